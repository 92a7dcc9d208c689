//! HTTP API surface
//!
//! Exposes the coordinator verbs as REST endpoints under a configurable
//! path prefix (default `/lra-coordinator`) and echoes the protocol
//! version header on every response.

mod config;
mod errors;
mod routes;
mod server;
mod version;

pub use config::HttpServerConfig;
pub use errors::{ApiError, ErrorResponse};
pub use routes::{coordinator_routes, CoordinatorState};
pub use server::HttpServer;
pub use version::{API_VERSION_HEADER, CURRENT_API_VERSION};
