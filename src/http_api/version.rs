//! Protocol version negotiation
//!
//! Every response carries the `Narayana-LRA-API-version` header. A client
//! that requested a version gets it echoed back; everyone else gets the
//! coordinator's current version.

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

/// Request and response header naming the protocol version.
pub const API_VERSION_HEADER: &str = "Narayana-LRA-API-version";

/// Version this coordinator speaks unless configured otherwise.
pub const CURRENT_API_VERSION: &str = "1.2";

/// Middleware echoing the requested (or configured) API version on every
/// response.
pub async fn echo_api_version(
    State(current): State<String>,
    request: Request,
    next: Next,
) -> Response {
    let requested = request
        .headers()
        .get(API_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string);

    let mut response = next.run(request).await;

    let value = requested.as_deref().unwrap_or(current.as_str());
    let name = HeaderName::from_bytes(API_VERSION_HEADER.as_bytes());
    if let (Ok(name), Ok(header)) = (name, HeaderValue::from_str(value)) {
        response.headers_mut().insert(name, header);
    }
    response
}
