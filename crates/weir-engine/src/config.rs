//! Configuration for the event-stream manager.

use std::collections::HashMap;
use std::time::Duration;

use weir_core::{error_codes, Error, RetrySettings};
use weir_core::spec::FatalPolicy;
use weir_transport::TlsProfileConfig;

/// Live defaults applied to stream specs at activation time.
///
/// These are never written into the persisted spec: a stream that left a
/// field unset picks up the current default on every (re)activation.
#[derive(Debug, Clone)]
pub struct StreamDefaults {
    /// Maximum events per batch.
    pub batch_size: usize,
    /// Maximum time an open batch waits before flushing.
    pub batch_timeout: Duration,
    /// Delivery retry settings.
    pub retry: RetrySettings,
    /// Handling of batches the sink classifies as fatal.
    pub fatal_policy: FatalPolicy,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_timeout: Duration::from_millis(250),
            retry: RetrySettings::default(),
            fatal_policy: FatalPolicy::default(),
        }
    }
}

/// Configuration for [`crate::EventStreamManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Live stream defaults.
    pub defaults: StreamDefaults,
    /// Named client-TLS profiles referenced by webhook transports.
    /// Parsed up front; read-only once the manager is constructed.
    pub tls_profiles: HashMap<String, TlsProfileConfig>,
    /// Grace period for a stream's tasks to drain on suspend.
    pub shutdown_timeout: Duration,
    /// How long the WebSocket sink waits for a batch acknowledgement.
    pub ack_timeout: Duration,
    /// Per-attempt request timeout for webhook deliveries.
    pub webhook_request_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            defaults: StreamDefaults::default(),
            tls_profiles: HashMap::new(),
            shutdown_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(30),
            webhook_request_timeout: Duration::from_secs(30),
        }
    }
}

impl ManagerConfig {
    /// Checks the configuration is usable before any stream starts.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.defaults.batch_size == 0 {
            return Err(Error::validation(
                error_codes::CONFIG_INVALID,
                "default batch size must be at least 1",
            ));
        }
        if self.defaults.batch_timeout.is_zero() {
            return Err(Error::validation(
                error_codes::CONFIG_INVALID,
                "default batch timeout must be greater than zero",
            ));
        }
        if !self.defaults.retry.factor.is_finite() || self.defaults.retry.factor < 1.0 {
            return Err(Error::validation(
                error_codes::CONFIG_INVALID,
                "default retry factor must be at least 1.0",
            ));
        }
        Ok(())
    }
}
