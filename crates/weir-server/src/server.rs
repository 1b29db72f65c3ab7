//! The HTTP listener.
//!
//! Construction is fail-fast: the socket is bound, the TLS material is
//! loaded, and the auth plugin is resolved before [`HttpServer::serve`]
//! is ever called, so configuration mistakes surface immediately with
//! their stable error codes.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tracing::info;

use weir_core::{error_codes, Error};
use weir_transport::tls::build_server_config;

use crate::auth::{new_auth_plugin, AuthPlugin};
use crate::config::HttpServerConfig;

/// Rejects requests the auth plugin does not authorize with the stable
/// `403` body.
async fn require_auth(
    State(plugin): State<Arc<dyn AuthPlugin>>,
    request: Request,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    match plugin.authorize(authorization).await {
        Ok(()) => next.run(request).await,
        Err(e) => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// A bound HTTP listener ready to serve a router.
pub struct HttpServer {
    name: String,
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    router: Router,
    tls: Option<RustlsConfig>,
    shutdown_timeout: Duration,
}

impl HttpServer {
    /// Binds the listener and prepares TLS and authentication.
    ///
    /// # Errors
    ///
    /// `FF00154` for an unusable listen address, `FF00153`/`FF00152`/
    /// `FF00155` for TLS material problems, `FF00168` for an unknown
    /// auth plugin name.
    pub fn new(name: &str, router: Router, config: &HttpServerConfig) -> Result<Self, Error> {
        let router = match &config.auth {
            Some(auth_config) => {
                let plugin = new_auth_plugin(auth_config)?;
                router.layer(middleware::from_fn_with_state(plugin, require_auth))
            }
            None => router,
        };

        let tls = if config.tls.enabled {
            Some(RustlsConfig::from_config(Arc::new(build_server_config(
                &config.tls,
            )?)))
        } else {
            None
        };

        let bind_addr = format!("{}:{}", config.address, config.port);
        let listener = std::net::TcpListener::bind(&bind_addr).map_err(|e| {
            Error::validation(
                error_codes::INVALID_LISTENER,
                format!("cannot listen on '{bind_addr}': {e}"),
            )
        })?;
        listener.set_nonblocking(true).map_err(|e| {
            Error::validation(
                error_codes::INVALID_LISTENER,
                format!("cannot configure listener on '{bind_addr}': {e}"),
            )
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            Error::validation(
                error_codes::INVALID_LISTENER,
                format!("cannot resolve listener address: {e}"),
            )
        })?;

        Ok(Self {
            name: name.to_string(),
            listener,
            local_addr,
            router,
            tls,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// The bound address, useful with port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests
    /// within the configured grace period.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<(), Error> {
        let handle = Handle::new();
        let shutdown_handle = handle.clone();
        let grace = self.shutdown_timeout;
        tokio::spawn(async move {
            shutdown.await;
            shutdown_handle.graceful_shutdown(Some(grace));
        });

        info!(
            server = %self.name,
            address = %self.local_addr,
            tls = self.tls.is_some(),
            "http server listening"
        );

        let service = self.router.into_make_service();
        let served = match self.tls {
            Some(tls) => {
                axum_server::from_tcp_rustls(self.listener, tls)
                    .handle(handle)
                    .serve(service)
                    .await
            }
            None => {
                axum_server::from_tcp(self.listener)
                    .handle(handle)
                    .serve(service)
                    .await
            }
        };
        served.map_err(|e| Error::internal(format!("http server '{}' failed: {e}", self.name)))
    }
}
