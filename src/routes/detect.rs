use crate::{
    detection::DetectionResult, error::DetectionError, model_service::ModelService,
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum DetectImageError {
    #[error("Missing multipart field `file`")]
    MissingFile,
    #[error("Invalid multipart upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error("Detection task failed: {0}")]
    Task(#[from] JoinError),
}

impl IntoResponse for DetectImageError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DetectImageError::MissingFile => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            DetectImageError::Multipart(e) => (e.status(), e.body_text()),
            DetectImageError::Detection(DetectionError::Decode(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            DetectImageError::Detection(DetectionError::Inference(_))
            | DetectImageError::Task(_) => {
                tracing::error!("Detection failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Inference failed".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn detect_objects<M: ModelService>(
    State(state): State<SharedState<M>>,
    mut multipart: Multipart,
) -> Result<Json<DetectionResult>, DetectImageError> {
    let mut upload = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let image_data = field.bytes().await?;
        upload = Some((filename, image_data));
        break;
    }

    let (filename, image_data) = upload.ok_or(DetectImageError::MissingFile)?;
    tracing::debug!("Received {:?} ({} bytes)", filename, image_data.len());

    let inference_service = state.inference_service.clone();
    let result =
        tokio::task::spawn_blocking(move || inference_service.detect(filename, &image_data))
            .await??;

    tracing::info!(
        num_detections = result.num_detections,
        "Detection request completed"
    );

    Ok(Json(result))
}
