use crate::{
    detection::{BoundingBox, RawDetection},
    error::DetectionError,
};
use ndarray::{s, ArrayView3, Axis};

/// Upper bound on candidates handed to NMS.
const MAX_NMS_CANDIDATES: usize = 30_000;

/// Geometry of an aspect-preserving resize into a square, gray-padded canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub width: u32,
    pub height: u32,
    pub new_width: u32,
    pub new_height: u32,
    pub left: u32,
    pub top: u32,
    pub gain: f32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, input_size: u32) -> Self {
        let size = input_size as f32;
        let gain = (size / height as f32).min(size / width as f32);

        let new_width = ((width as f32 * gain).round() as u32).clamp(1, input_size);
        let new_height = ((height as f32 * gain).round() as u32).clamp(1, input_size);

        let dw = (input_size - new_width) as f32 / 2.;
        let dh = (input_size - new_height) as f32 / 2.;

        Self {
            width,
            height,
            new_width,
            new_height,
            left: (dw - 0.1).round().max(0.) as u32,
            top: (dh - 0.1).round().max(0.) as u32,
            gain,
        }
    }

    /// Maps a box from letterbox space back onto the original image, clipped
    /// to its bounds.
    pub fn to_original(&self, bbox: BoundingBox) -> BoundingBox {
        let width = self.width as f32;
        let height = self.height as f32;
        let left = self.left as f32;
        let top = self.top as f32;

        let xa = ((bbox.x1 - left) / self.gain).clamp(0., width);
        let ya = ((bbox.y1 - top) / self.gain).clamp(0., height);
        let xb = ((bbox.x2 - left) / self.gain).clamp(0., width);
        let yb = ((bbox.y2 - top) / self.gain).clamp(0., height);

        BoundingBox {
            x1: xa.min(xb),
            y1: ya.min(yb),
            x2: xa.max(xb),
            y2: ya.max(yb),
        }
    }
}

/// Decodes a `[1, 4 + classes, candidates]` YOLOv8 head. Rows 0..4 hold
/// `cx, cy, w, h`, the remaining rows hold per-class scores.
pub fn decode_predictions(
    output: ArrayView3<f32>,
    num_classes: usize,
    min_probability: f32,
) -> Result<Vec<RawDetection>, DetectionError> {
    let shape = output.shape();
    if shape[0] != 1 || shape[1] <= 4 {
        return Err(DetectionError::Inference(format!(
            "unexpected output shape {:?}",
            shape
        )));
    }

    let model_classes = shape[1] - 4;
    if model_classes != num_classes {
        return Err(DetectionError::Inference(format!(
            "model emits {} classes but {} labels are loaded",
            model_classes, num_classes
        )));
    }

    let output = output.index_axis(Axis(0), 0);
    let mut candidates = Vec::new();

    for i in 0..output.shape()[1] {
        let (class_id, confidence) = output
            .slice(s![4.., i])
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (index, value)| {
                if value > best.1 {
                    (index, value)
                } else {
                    best
                }
            });

        if !confidence.is_finite() || confidence <= min_probability {
            continue;
        }

        let xc = output[[0, i]];
        let yc = output[[1, i]];
        let w = output[[2, i]].abs();
        let h = output[[3, i]].abs();

        if ![xc, yc, w, h].iter().all(|v| v.is_finite()) {
            continue;
        }

        candidates.push(RawDetection {
            class_id,
            confidence: confidence.clamp(0., 1.),
            bbox: BoundingBox {
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            },
        });
    }

    Ok(candidates)
}

/// Per-class greedy NMS. The result is ordered by confidence, highest first.
pub fn non_max_suppression(
    mut candidates: Vec<RawDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates.truncate(MAX_NMS_CANDIDATES);

    let mut kept: Vec<RawDetection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }

        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });

        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

/// Full post-inference chain: decode the head, suppress overlaps, then map
/// the survivors back onto the original image.
pub fn postprocess(
    output: ArrayView3<f32>,
    letterbox: &Letterbox,
    num_classes: usize,
    min_probability: f32,
    iou_threshold: f32,
    max_detections: usize,
) -> Result<Vec<RawDetection>, DetectionError> {
    let candidates = decode_predictions(output, num_classes, min_probability)?;

    let detections = non_max_suppression(candidates, iou_threshold, max_detections)
        .into_iter()
        .map(|detection| RawDetection {
            bbox: letterbox.to_original(detection.bbox),
            ..detection
        })
        .collect();

    Ok(detections)
}
