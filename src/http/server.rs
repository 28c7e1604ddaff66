//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with a single catch-all fallback
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind server to listener
//! - Turn each request into an [`Event`] and hand it to the [`App`]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response as AxumResponse},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cache::{MemoryStorage, Storage};
use crate::config::GatewayConfig;
use crate::http::error::{error_response, HttpError};
use crate::http::event::Event;
use crate::http::pipeline::App;
use crate::lifecycle::startup::{build_app, StartupError};

/// Application state injected into the dispatch handler.
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<App>,
    pub max_body_bytes: usize,
    pub base_url: String,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
}

impl HttpServer {
    /// Create a server backed by in-memory cache storage.
    pub fn new(config: GatewayConfig) -> Result<Self, StartupError> {
        Self::with_storage(config, Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(config: GatewayConfig, storage: Arc<dyn Storage>) -> Result<Self, StartupError> {
        let app = build_app(&config, storage)?;
        let state = AppState {
            app: Arc::new(app),
            max_body_bytes: config.server.max_body_bytes,
            base_url: config.server.base_url.clone(),
        };
        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(config.server.request_timeout_secs),
            ))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The axum router, for embedding or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.config.routes.len(),
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Catch-all handler: every request goes through the [`App`].
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> AxumResponse {
    let (parts, body) = request.into_parts();
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let event = Event::new(parts.method, url).with_headers(parts.headers);
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, url = %event.original_url(), "Request body rejected");
            let error = HttpError::new(413).with_message(format!("Request body exceeds {} bytes", state.max_body_bytes));
            return error_response(&error, &event, &state.base_url).into_response();
        }
    };

    state.app.handle(event.with_body(bytes)).await.into_response()
}
