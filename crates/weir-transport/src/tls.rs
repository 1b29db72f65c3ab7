//! TLS material loading for sinks and listeners.
//!
//! Client-side profiles are named in the manager configuration and
//! referenced from webhook transport descriptors; the server-side config
//! backs the HTTP listener's optional mTLS. All loading failures carry
//! the stable codes `FF00153` (unreadable CA), `FF00152` (no valid PEM
//! certificates), and `FF00155` (bad certificate/key pair).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use serde::{Deserialize, Serialize};
use weir_core::{error_codes, Error};

/// A named client-TLS profile for webhook deliveries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsProfileConfig {
    /// CA bundle used to verify the server, PEM format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    /// Client certificate presented to the server, PEM format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    /// Private key for the client certificate, PEM format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

/// TLS settings for the HTTP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTlsConfig {
    /// Whether the listener terminates TLS.
    #[serde(default)]
    pub enabled: bool,
    /// Server certificate chain, PEM format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    /// Server private key, PEM format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// CA bundle for verifying client certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    /// Whether to require a verified client certificate (mTLS).
    #[serde(default)]
    pub client_auth: bool,
}

/// Reads a CA bundle, failing with `FF00153` when the file cannot be
/// read and `FF00152` when it contains no valid PEM certificates.
pub fn load_ca_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let bytes = fs::read(path).map_err(|e| {
        Error::validation(
            error_codes::CA_FILE_UNREADABLE,
            format!("cannot read CA file '{}': {e}", path.display()),
        )
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut bytes.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| {
            Error::validation(
                error_codes::INVALID_CA_PEM,
                format!("invalid PEM in CA file '{}': {e}", path.display()),
            )
        })?;
    if certs.is_empty() {
        return Err(Error::validation(
            error_codes::INVALID_CA_PEM,
            format!("no certificates found in CA file '{}'", path.display()),
        ));
    }
    Ok(certs)
}

/// Reads a certificate chain, failing with `FF00155`.
fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let bytes = fs::read(path).map_err(|e| {
        Error::validation(
            error_codes::INVALID_KEY_PAIR,
            format!("cannot read certificate file '{}': {e}", path.display()),
        )
    })?;
    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut bytes.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| {
            Error::validation(
                error_codes::INVALID_KEY_PAIR,
                format!("invalid PEM in certificate file '{}': {e}", path.display()),
            )
        })?;
    if chain.is_empty() {
        return Err(Error::validation(
            error_codes::INVALID_KEY_PAIR,
            format!("no certificates found in '{}'", path.display()),
        ));
    }
    Ok(chain)
}

/// Reads a private key, failing with `FF00155`.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let bytes = fs::read(path).map_err(|e| {
        Error::validation(
            error_codes::INVALID_KEY_PAIR,
            format!("cannot read key file '{}': {e}", path.display()),
        )
    })?;
    rustls_pemfile::private_key(&mut bytes.as_slice())
        .map_err(|e| {
            Error::validation(
                error_codes::INVALID_KEY_PAIR,
                format!("invalid PEM in key file '{}': {e}", path.display()),
            )
        })?
        .ok_or_else(|| {
            Error::validation(
                error_codes::INVALID_KEY_PAIR,
                format!("no private key found in '{}'", path.display()),
            )
        })
}

/// TLS material resolved from a client profile, in the HTTP client's
/// native shapes.
pub struct ClientTlsMaterial {
    /// Extra root certificates to trust.
    pub root_certs: Vec<reqwest::Certificate>,
    /// Client identity for mutual TLS, when configured.
    pub identity: Option<reqwest::Identity>,
}

/// Loads the material referenced by a client profile.
pub fn load_client_material(profile: &TlsProfileConfig) -> Result<ClientTlsMaterial, Error> {
    let mut root_certs = Vec::new();
    if let Some(ca) = &profile.ca_file {
        for der in load_ca_certs(ca)? {
            root_certs.push(reqwest::Certificate::from_der(der.as_ref()).map_err(|e| {
                Error::validation(
                    error_codes::INVALID_CA_PEM,
                    format!("CA certificate rejected: {e}"),
                )
            })?);
        }
    }

    let identity = match (&profile.cert_file, &profile.key_file) {
        (Some(cert), Some(key)) => {
            let mut pem = fs::read(cert).map_err(|e| {
                Error::validation(
                    error_codes::INVALID_KEY_PAIR,
                    format!("cannot read certificate file '{}': {e}", cert.display()),
                )
            })?;
            pem.extend(fs::read(key).map_err(|e| {
                Error::validation(
                    error_codes::INVALID_KEY_PAIR,
                    format!("cannot read key file '{}': {e}", key.display()),
                )
            })?);
            Some(reqwest::Identity::from_pem(&pem).map_err(|e| {
                Error::validation(
                    error_codes::INVALID_KEY_PAIR,
                    format!("client identity rejected: {e}"),
                )
            })?)
        }
        (None, None) => None,
        _ => {
            return Err(Error::validation(
                error_codes::INVALID_KEY_PAIR,
                "certFile and keyFile must be configured together",
            ))
        }
    };

    Ok(ClientTlsMaterial {
        root_certs,
        identity,
    })
}

/// Builds the rustls server configuration for the HTTP listener.
///
/// The CA bundle (when configured) is processed before the server key
/// pair so CA problems surface with their own codes.
pub fn build_server_config(cfg: &ServerTlsConfig) -> Result<ServerConfig, Error> {
    // Pin the process-wide crypto provider before the first builder;
    // more than one rustls backend can be linked into the final binary.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let roots = match &cfg.ca_file {
        Some(ca) => {
            let mut store = RootCertStore::empty();
            for cert in load_ca_certs(ca)? {
                store.add(cert).map_err(|e| {
                    Error::validation(
                        error_codes::INVALID_CA_PEM,
                        format!("CA certificate rejected: {e}"),
                    )
                })?;
            }
            Some(store)
        }
        None => None,
    };

    let (cert_file, key_file) = match (&cfg.cert_file, &cfg.key_file) {
        (Some(cert), Some(key)) => (cert, key),
        _ => {
            return Err(Error::validation(
                error_codes::INVALID_KEY_PAIR,
                "certFile and keyFile are required when TLS is enabled",
            ))
        }
    };
    let chain = load_cert_chain(cert_file)?;
    let key = load_private_key(key_file)?;

    let builder = ServerConfig::builder();
    let builder = if cfg.client_auth {
        let Some(roots) = roots else {
            return Err(Error::validation(
                error_codes::CONFIG_INVALID,
                "clientAuth requires a caFile to verify clients against",
            ));
        };
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| {
                Error::validation(
                    error_codes::INVALID_CA_PEM,
                    format!("client verifier rejected CA bundle: {e}"),
                )
            })?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    builder.with_single_cert(chain, key).map_err(|e| {
        Error::validation(
            error_codes::INVALID_KEY_PAIR,
            format!("server certificate/key pair rejected: {e}"),
        )
    })
}
