use crate::{
    config::{Config, ServerConfig},
    inference_service::InferenceService,
    labels::ClassLabels,
    model_service::ModelService,
    ort_service::OrtModelService,
    routes::api_routes,
};
use axum::{extract::DefaultBodyLimit, Router};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;

pub struct SharedState<M: ModelService> {
    pub inference_service: InferenceService<M>,
}

impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            inference_service: self.inference_service.clone(),
        }
    }
}

pub fn build_router<M: ModelService>(model_service: M, max_upload_bytes: usize) -> Router {
    let app_state = SharedState {
        inference_service: InferenceService::new(model_service),
    };

    Router::new()
        .merge(api_routes())
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(model_service: impl ModelService, config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = config.get_address();
        let router = build_router(model_service, config.max_upload_bytes);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Detection service listening on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received, starting graceful shutdown")
            })
            .await?;

        Ok(())
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let labels = ClassLabels::load(&config.labels).inspect_err(|e| {
        tracing::error!("Failed to load labels: {}", e);
    })?;
    let ort_model_service = OrtModelService::new(&config.model, labels).inspect_err(|e| {
        tracing::error!("Failed to load model: {}", e);
    })?;

    let server = HttpServer::new(ort_model_service, &config.server).await?;
    server.run().await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
