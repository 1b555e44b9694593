mod inference_service;
mod ort_service;
mod postprocessing;
mod routes;
mod server;

pub mod config;
pub mod detection;
pub mod error;
pub mod labels;
pub mod model_service;

pub use server::{build_router, start_server};
