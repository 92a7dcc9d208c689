//! HTTP server configuration

use serde::{Deserialize, Serialize};

use super::version::CURRENT_API_VERSION;

/// Bind and routing configuration for the coordinator's HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path prefix all coordinator routes live under
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Protocol version advertised when the client does not request one
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_path_prefix() -> String {
    "/lra-coordinator".to_string()
}

fn default_api_version() -> String {
    CURRENT_API_VERSION.to_string()
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path_prefix: default_path_prefix(),
            api_version: default_api_version(),
        }
    }
}

impl HttpServerConfig {
    /// The socket address string to bind.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HttpServerConfig::default();
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
        assert_eq!(config.path_prefix, "/lra-coordinator");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: HttpServerConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
    }
}
