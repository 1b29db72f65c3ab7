//! # Weir Server
//!
//! A generic HTTP listener — optional TLS/mTLS termination, pluggable
//! request authentication, graceful shutdown — plus the REST routes that
//! map 1:1 onto the stream manager's operations.
//!
//! The listener is independent of the stream engine: it serves whatever
//! router it is given, and [`routes::stream_router`] produces the one
//! for stream management.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod auth;
pub mod config;
pub mod routes;
pub mod server;

pub use auth::{new_auth_plugin, AuthPlugin, BasicAuth};
pub use config::{AuthConfig, BasicAuthConfig, HttpServerConfig};
pub use routes::stream_router;
pub use server::HttpServer;
