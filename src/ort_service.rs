use crate::{
    config::{ModelConfig, Validatable},
    detection::RawDetection,
    error::{DetectionError, ModelLoadError},
    labels::ClassLabels,
    model_service::ModelService,
    postprocessing::{postprocess, Letterbox},
};
use image::{imageops::FilterType, Rgb, RgbImage};
use ndarray::{Array, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const PAD_COLOR: u8 = 114;

/// Letterboxes `image` into a `[1, 3, size, size]` tensor scaled to `[0, 1]`.
fn transform_image(image: &RgbImage, input_size: u32) -> (Array<f32, Ix4>, Letterbox) {
    let letterbox = Letterbox::new(image.width(), image.height(), input_size);
    let resized = image::imageops::resize(
        image,
        letterbox.new_width,
        letterbox.new_height,
        FilterType::Triangle,
    );

    let size = input_size as usize;
    let mut input = Array::from_elem((1, 3, size, size), PAD_COLOR as f32 / 255.);
    let left = letterbox.left as usize;
    let top = letterbox.top as usize;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize + left;
        let y = y as usize + top;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    (input, letterbox)
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    labels: Arc<ClassLabels>,
    input_size: u32,
    min_probability: f32,
    iou_threshold: f32,
    max_detections: usize,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig, labels: ClassLabels) -> Result<Self, ModelLoadError> {
        model_config
            .check_parameters()
            .map_err(ModelLoadError::InvalidParameters)?;

        let model_path = model_config.get_path();
        if model_config.validate().is_err() {
            return Err(ModelLoadError::ModelNotFound(model_path));
        }

        #[cfg(feature = "tensorrt")]
        {
            use ort::execution_providers::TensorRTExecutionProvider;
            ort::init()
                .with_execution_providers([TensorRTExecutionProvider::default()
                    .with_engine_cache(true)
                    .build()])
                .commit()?;
        }

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_path
        );

        let service = Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            labels: Arc::new(labels),
            input_size: model_config.input_size,
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
            max_detections: model_config.max_detections,
        };

        if model_config.warmup {
            service.warmup()?;
        }

        Ok(service)
    }

    /// Runs one blank frame through the model so a model/labels mismatch
    /// surfaces at startup instead of on the first request.
    fn warmup(&self) -> Result<(), DetectionError> {
        let blank = RgbImage::from_pixel(
            self.input_size,
            self.input_size,
            Rgb([PAD_COLOR, PAD_COLOR, PAD_COLOR]),
        );
        let detections = self.predict(&blank)?;
        tracing::info!("Model warm-up done ({} detections)", detections.len());
        Ok(())
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<Array<f32, Ix3>, DetectionError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectionError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectionError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectionError::Inference(format!("inference failed: {}", e)))?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| DetectionError::Inference(format!("failed to extract tensor: {}", e)))?;

        let array = output
            .into_dimensionality::<Ix3>()
            .map_err(|e| DetectionError::Inference(format!("invalid tensor shape: {}", e)))?
            .to_owned();

        Ok(array)
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectionError> {
        let (input, letterbox) = transform_image(image, self.input_size);
        let output = self.run_inference(&input)?;

        postprocess(
            output.view(),
            &letterbox,
            self.labels.len(),
            self.min_probability,
            self.iou_threshold,
            self.max_detections,
        )
    }

    fn labels(&self) -> &ClassLabels {
        &self.labels
    }
}
