//! Stream spec validation and non-destructive defaults.
//!
//! Validation runs against the *effective* values — spec fields overlaid
//! on the live defaults — so a spec that leaves fields unset is checked
//! exactly as it will run. With `apply_defaults` false (the path the
//! manager uses before persisting), nothing is written back into the
//! spec; defaults therefore stay live-configurable. With
//! `apply_defaults` true the resolved values are filled in, for callers
//! that want a fully materialised spec.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use weir_core::{error_codes, Error, EventStreamSpec, SourceRuntime, StreamStatus, TransportDescriptor};

use crate::config::ManagerConfig;

fn name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._-]{1,64}$").expect("static regex"))
}

/// Validates a stream spec against the manager configuration and the
/// source runtime's type-specific rules.
pub async fn validate_stream<'a, CT, DT>(
    spec: &'a mut EventStreamSpec<CT>,
    config: &'a ManagerConfig,
    runtime: &dyn SourceRuntime<CT, DT>,
    apply_defaults: bool,
) -> Result<(), Error>
where
    CT: Send + Sync + 'a + 'static,
    DT: Send + 'a + 'static,
{
    if !name_regex().is_match(spec.name()) {
        return Err(Error::validation(
            error_codes::INVALID_NAME,
            format!(
                "stream name '{}' must match {}",
                spec.name(),
                name_regex().as_str()
            ),
        ));
    }

    if let Some(status) = spec.status {
        if !matches!(status, StreamStatus::Started | StreamStatus::Stopped) {
            return Err(Error::validation(
                error_codes::STATUS_NOT_ASSERTABLE,
                format!("stream status can only be asserted as started or stopped, not '{status}'"),
            ));
        }
    }

    let defaults = &config.defaults;
    if spec.batch_size.unwrap_or(defaults.batch_size) == 0 {
        return Err(Error::validation(
            error_codes::INVALID_BATCH_POLICY,
            "batch size must be at least 1",
        ));
    }
    let batch_timeout = spec
        .batch_timeout_ms
        .map_or(defaults.batch_timeout, Duration::from_millis);
    if batch_timeout.is_zero() {
        return Err(Error::validation(
            error_codes::INVALID_BATCH_POLICY,
            "batch timeout must be greater than zero",
        ));
    }

    if let Some(retry) = &spec.retry {
        let factor = retry.factor.unwrap_or(defaults.retry.factor);
        if !factor.is_finite() || factor < 1.0 {
            return Err(Error::validation(
                error_codes::INVALID_RETRY_POLICY,
                format!("retry factor {factor} must be at least 1.0"),
            ));
        }
    }

    match &spec.transport {
        None => {
            return Err(Error::validation(
                error_codes::INVALID_TRANSPORT,
                "a transport descriptor is required",
            ))
        }
        Some(TransportDescriptor::WebSocket { channel }) => {
            if channel.is_empty() {
                return Err(Error::validation(
                    error_codes::INVALID_TRANSPORT,
                    "websocket transport requires a channel name",
                ));
            }
        }
        Some(TransportDescriptor::Webhook { url, tls_profile }) => {
            weir_transport::webhook::validate_url(url)?;
            if let Some(profile) = tls_profile {
                if !config.tls_profiles.contains_key(profile) {
                    return Err(Error::validation(
                        error_codes::UNKNOWN_TLS_PROFILE,
                        format!("webhook references unknown TLS profile '{profile}'"),
                    ));
                }
            }
        }
    }

    if let Some(type_config) = &spec.config {
        runtime.validate(type_config).await.map_err(|e| {
            Error::validation(
                error_codes::INVALID_TYPE_CONFIG,
                format!("invalid stream configuration: {e}"),
            )
        })?;
    }

    if apply_defaults {
        spec.batch_size.get_or_insert(defaults.batch_size);
        #[allow(clippy::cast_possible_truncation)]
        spec.batch_timeout_ms
            .get_or_insert(defaults.batch_timeout.as_millis() as u64);
        spec.fatal_policy.get_or_insert(defaults.fatal_policy);
    }

    Ok(())
}
