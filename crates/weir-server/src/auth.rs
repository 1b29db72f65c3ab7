//! Pluggable request authentication.
//!
//! Plugins are resolved by name at server construction; an unknown name
//! fails initialisation with `FF00168`. A request a plugin rejects is
//! answered `403` with the stable body `{"error":"FF00169: Unauthorized"}`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use weir_core::{error_codes, Error};

use crate::config::AuthConfig;

/// Authorizes one request from its `Authorization` header.
#[async_trait]
pub trait AuthPlugin: Send + Sync {
    /// Returns `Ok` to let the request through.
    async fn authorize(&self, authorization: Option<&str>) -> Result<(), Error>;
}

/// HTTP basic authentication against a `user:password` credential file.
pub struct BasicAuth {
    users: HashMap<String, String>,
}

impl BasicAuth {
    /// Loads credentials from a file of `user:password` lines. Blank
    /// lines and `#` comments are ignored.
    pub fn from_password_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(
                error_codes::CONFIG_INVALID,
                format!("cannot read password file '{}': {e}", path.display()),
            )
        })?;
        let mut users = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((user, password)) = line.split_once(':') else {
                return Err(Error::validation(
                    error_codes::CONFIG_INVALID,
                    format!("malformed line in password file '{}'", path.display()),
                ));
            };
            users.insert(user.to_string(), password.to_string());
        }
        Ok(Self { users })
    }
}

#[async_trait]
impl AuthPlugin for BasicAuth {
    async fn authorize(&self, authorization: Option<&str>) -> Result<(), Error> {
        let Some(header) = authorization else {
            return Err(Error::Unauthorized);
        };
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return Err(Error::Unauthorized);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| Error::Unauthorized)?;
        let decoded = String::from_utf8(decoded).map_err(|_| Error::Unauthorized)?;
        let Some((user, password)) = decoded.split_once(':') else {
            return Err(Error::Unauthorized);
        };
        match self.users.get(user) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(Error::Unauthorized),
        }
    }
}

/// Resolves an auth plugin by name.
pub fn new_auth_plugin(config: &AuthConfig) -> Result<Arc<dyn AuthPlugin>, Error> {
    match config.plugin.as_str() {
        "basic" => {
            let basic = config.basic.as_ref().ok_or_else(|| {
                Error::validation(
                    error_codes::CONFIG_INVALID,
                    "basic auth requires a password file",
                )
            })?;
            Ok(Arc::new(BasicAuth::from_password_file(
                &basic.password_file,
            )?))
        }
        other => Err(Error::validation(
            error_codes::UNKNOWN_AUTH_PLUGIN,
            format!("unknown auth plugin '{other}'"),
        )),
    }
}
