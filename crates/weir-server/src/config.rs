//! Configuration for the HTTP listener.

use std::path::PathBuf;
use std::time::Duration;

use weir_transport::ServerTlsConfig;

/// Settings for one HTTP listener.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Interface to bind.
    pub address: String,
    /// Port to bind; 0 asks the OS for an ephemeral port.
    pub port: u16,
    /// TLS termination, disabled by default.
    pub tls: ServerTlsConfig,
    /// Request authentication; `None` serves unauthenticated.
    pub auth: Option<AuthConfig>,
    /// Grace period for in-flight requests on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 5000,
            tls: ServerTlsConfig::default(),
            auth: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Selects and configures the authentication plugin.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Plugin name; `"basic"` is built in.
    pub plugin: String,
    /// Settings for the basic plugin.
    pub basic: Option<BasicAuthConfig>,
}

/// Settings for HTTP basic authentication.
#[derive(Debug, Clone)]
pub struct BasicAuthConfig {
    /// File of `user:password` lines.
    pub password_file: PathBuf,
}
