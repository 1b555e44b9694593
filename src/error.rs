use std::path::PathBuf;
use thiserror::Error;

/// Failures of a single `detect` call.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Error decoding image: {0}")]
    Decode(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Startup failures. None of these are recoverable; the process must not serve.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Invalid model parameters: {0}")]
    InvalidParameters(String),
    #[error("Model file not found: {0:?}")]
    ModelNotFound(PathBuf),
    #[error("Failed to build ONNX session: {0}")]
    Session(#[from] ort::Error),
    #[error("Failed to load labels from {path:?}: {source}")]
    Labels {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Label file {0:?} does not contain any label")]
    EmptyLabels(PathBuf),
    #[error("Model warm-up failed: {0}")]
    Warmup(#[from] DetectionError),
}
