mod detect;
mod health;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(health::healthcheck))
        .route("/detect", post(detect::detect_objects::<M>))
}
