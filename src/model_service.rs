use crate::{detection::RawDetection, error::DetectionError, labels::ClassLabels};
use image::RgbImage;

/// A loaded detector. Implementations are shared across requests and must be
/// safe to call concurrently; `predict` blocks until inference completes.
pub trait ModelService: Send + Sync + 'static {
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectionError>;

    fn labels(&self) -> &ClassLabels;
}
