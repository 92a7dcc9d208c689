//! # HTTP Server
//!
//! Binds the coordinator routes under the configured path prefix and
//! serves them until shutdown.

use std::sync::Arc;

use axum::middleware;
use axum::Router;
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::Coordinator;

use super::config::HttpServerConfig;
use super::routes::{coordinator_routes, CoordinatorState};
use super::version::echo_api_version;

/// HTTP server for the coordinator API.
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    /// Builds the server around an engine.
    pub fn new(coordinator: Arc<Coordinator>, config: HttpServerConfig) -> Self {
        let router = Self::build_router(coordinator, &config);
        Self { config, router }
    }

    /// Build the router with all coordinator endpoints
    fn build_router(coordinator: Arc<Coordinator>, config: &HttpServerConfig) -> Router {
        let state = Arc::new(CoordinatorState::new(coordinator));
        let router = Router::new()
            .nest(&config.path_prefix, coordinator_routes(state))
            .layer(middleware::from_fn_with_state(
                config.api_version.clone(),
                echo_api_version,
            ))
            .layer(TraceLayer::new_for_http());
        let normalized = NormalizePathLayer::trim_trailing_slash().layer(router);
        Router::new().fallback_service(normalized)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for tests)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serves until `shutdown` resolves.
    pub async fn start(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.socket_addr()).await?;
        info!(
            addr = %self.config.socket_addr(),
            prefix = %self.config.path_prefix,
            "coordinator API listening"
        );
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
