use crate::{
    detection::{Detection, DetectionResult},
    error::DetectionError,
    model_service::ModelService,
};
use image::RgbImage;
use std::sync::Arc;
use tracing::instrument;

/// Decodes arbitrary encoded image bytes into an 8-bit RGB grid.
pub fn decode_image(image_data: &[u8]) -> Result<RgbImage, DetectionError> {
    if image_data.is_empty() {
        return Err(DetectionError::Decode("empty payload".to_string()));
    }

    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| DetectionError::Decode(e.to_string()))?;

    let image = image_reader
        .decode()
        .map_err(|e| DetectionError::Decode(e.to_string()))?;

    Ok(image.to_rgb8())
}

pub struct InferenceService<M: ModelService> {
    model_service: Arc<M>,
}

impl<M: ModelService> Clone for InferenceService<M> {
    fn clone(&self) -> Self {
        Self {
            model_service: self.model_service.clone(),
        }
    }
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(model_service: M) -> Self {
        Self {
            model_service: Arc::new(model_service),
        }
    }

    #[instrument(skip(self, image_data), fields(bytes = image_data.len()))]
    pub fn detect(
        &self,
        filename: Option<String>,
        image_data: &[u8],
    ) -> Result<DetectionResult, DetectionError> {
        let image = decode_image(image_data)?;
        let raw_detections = self.model_service.predict(&image)?;
        let labels = self.model_service.labels();

        let detections = raw_detections
            .into_iter()
            .map(|raw| {
                let label = labels.get(raw.class_id).ok_or_else(|| {
                    DetectionError::Inference(format!(
                        "class index {} outside of the {} loaded labels",
                        raw.class_id,
                        labels.len()
                    ))
                })?;

                Ok(Detection {
                    label: label.to_string(),
                    confidence: raw.confidence,
                    bbox: raw.bbox,
                })
            })
            .collect::<Result<Vec<_>, DetectionError>>()?;

        tracing::debug!("Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: label={}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.label,
                detection.confidence,
                detection.bbox.x1,
                detection.bbox.y1,
                detection.bbox.x2,
                detection.bbox.y2
            );
        }

        Ok(DetectionResult::new(filename, detections))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        detection::{BoundingBox, RawDetection},
        labels::ClassLabels,
    };
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    /// Emits one zebra for images wider than 64 pixels and nothing otherwise.
    pub(crate) struct MockModelService {
        labels: ClassLabels,
        out_of_range: bool,
    }

    impl MockModelService {
        pub(crate) fn new() -> Self {
            Self {
                labels: ClassLabels::new(
                    ["buffalo", "elephant", "rhino", "zebra"]
                        .iter()
                        .map(|l| l.to_string())
                        .collect(),
                ),
                out_of_range: false,
            }
        }

        fn out_of_range() -> Self {
            Self {
                out_of_range: true,
                ..Self::new()
            }
        }
    }

    impl ModelService for MockModelService {
        fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectionError> {
            if self.out_of_range {
                return Ok(vec![RawDetection {
                    class_id: 42,
                    confidence: 0.9,
                    bbox: BoundingBox {
                        x1: 0.,
                        y1: 0.,
                        x2: 1.,
                        y2: 1.,
                    },
                }]);
            }

            if image.width() <= 64 {
                return Ok(vec![]);
            }

            Ok(vec![RawDetection {
                class_id: 3,
                confidence: 0.91,
                bbox: BoundingBox {
                    x1: 10.,
                    y1: 20.,
                    x2: image.width() as f32 - 10.,
                    y2: image.height() as f32 - 20.,
                },
            }])
        }

        fn labels(&self) -> &ClassLabels {
            &self.labels
        }
    }

    pub(crate) fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([255, 0, 0]));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_image_png() {
        let image = decode_image(&encode_png(100, 50)).unwrap();

        assert_eq!(image.dimensions(), (100, 50));
        assert_eq!(image.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_decode_image_drops_alpha() {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 4]));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();

        let image = decode_image(cursor.get_ref()).unwrap();

        assert_eq!(image.get_pixel(3, 3), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_decode_image_rejects_text_and_empty_payloads() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(DetectionError::Decode(_))
        ));
        assert!(matches!(decode_image(&[]), Err(DetectionError::Decode(_))));
    }

    #[test]
    fn test_detect_single_subject() {
        let service = InferenceService::new(MockModelService::new());

        let result = service
            .detect(Some("zebra.png".to_string()), &encode_png(200, 100))
            .unwrap();

        assert_eq!(result.filename.as_deref(), Some("zebra.png"));
        assert_eq!(result.num_detections, 1);
        assert_eq!(result.detections.len(), result.num_detections);

        let detection = &result.detections[0];
        assert_eq!(detection.label, "zebra");
        assert!(detection.confidence > 0.5);
        assert!(detection.bbox.x1 <= detection.bbox.x2);
        assert!(detection.bbox.y1 <= detection.bbox.y2);
    }

    #[test]
    fn test_detect_labels_come_from_the_model_label_set() {
        let service = InferenceService::new(MockModelService::new());
        let labels = service.model_service.labels();

        let result = service.detect(None, &encode_png(320, 240)).unwrap();

        assert!(!result.detections.is_empty());
        for detection in &result.detections {
            assert!(
                labels.contains(&detection.label),
                "unexpected label {:?}",
                detection.label
            );
        }
    }

    #[test]
    fn test_detect_empty_scene() {
        let service = InferenceService::new(MockModelService::new());

        let result = service.detect(None, &encode_png(32, 32)).unwrap();

        assert_eq!(result.num_detections, 0);
        assert!(result.detections.is_empty());
    }

    #[test]
    fn test_detect_is_deterministic() {
        let service = InferenceService::new(MockModelService::new());
        let image_data = encode_png(120, 80);

        let first = service.detect(None, &image_data).unwrap();
        let second = service.detect(None, &image_data).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_detect_rejects_undecodable_bytes() {
        let service = InferenceService::new(MockModelService::new());

        let result = service.detect(None, b"hello");

        assert!(matches!(result, Err(DetectionError::Decode(_))));
    }

    #[test]
    fn test_detect_unknown_class_is_an_inference_error() {
        let service = InferenceService::new(MockModelService::out_of_range());

        let result = service.detect(None, &encode_png(100, 100));

        assert!(matches!(result, Err(DetectionError::Inference(_))));
    }
}
