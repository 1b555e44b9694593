use axum::{response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    message: String,
}

pub async fn healthcheck() -> impl IntoResponse {
    Json(Status {
        message: "Object detection API is running!".into(),
    })
}
