//! Weir structured error code registry.
//!
//! Every error in Weir carries a stable `FF00xxx` code that is:
//! - Present in the error message (grep-able in logs)
//! - Present in the source code (grep-able in code)
//! - Stable across versions (codes are never reused)
//!
//! # Code Ranges
//!
//! | Range | Category |
//! |-------|----------|
//! | `FF0010x`–`FF0011x` | Configuration & spec validation |
//! | `FF0015x` | TLS material & listener setup |
//! | `FF0016x` | Lifecycle, persistence, auth |
//! | `FF0017x` | Transport & internal |

// ── Configuration & validation (FF0010x–FF0011x) ──

/// Manager configuration is missing or out of range.
pub const CONFIG_INVALID: &str = "FF00109";
/// Stream name is missing or does not match the allowed name format.
pub const INVALID_NAME: &str = "FF00110";
/// Stream status can only be asserted as 'started' or 'stopped'.
pub const STATUS_NOT_ASSERTABLE: &str = "FF00111";
/// Batch policy out of range (size must be >= 1, timeout > 0).
pub const INVALID_BATCH_POLICY: &str = "FF00112";
/// Retry policy out of range.
pub const INVALID_RETRY_POLICY: &str = "FF00113";
/// Transport descriptor is missing or malformed.
pub const INVALID_TRANSPORT: &str = "FF00114";
/// Transport references a TLS profile that is not configured.
pub const UNKNOWN_TLS_PROFILE: &str = "FF00115";
/// The type-specific configuration was rejected by the source runtime.
pub const INVALID_TYPE_CONFIG: &str = "FF00116";

// ── TLS material & listener (FF0015x) ──

/// CA file did not contain any valid PEM certificates.
pub const INVALID_CA_PEM: &str = "FF00152";
/// CA file could not be read.
pub const CA_FILE_UNREADABLE: &str = "FF00153";
/// Listener address could not be parsed or bound.
pub const INVALID_LISTENER: &str = "FF00154";
/// Certificate/key pair could not be loaded.
pub const INVALID_KEY_PAIR: &str = "FF00155";

// ── Lifecycle, persistence, auth (FF0016x) ──

/// No resource found with the supplied ID.
pub const NOT_FOUND: &str = "FF00164";
/// Operation is not allowed from the stream's current state.
pub const CONFLICT: &str = "FF00165";
/// Persistence operation failed.
pub const STORAGE: &str = "FF00166";
/// Operation exceeded its deadline.
pub const TIMEOUT: &str = "FF00167";
/// Unknown authentication plugin name.
pub const UNKNOWN_AUTH_PLUGIN: &str = "FF00168";
/// Request was not authorized.
pub const UNAUTHORIZED: &str = "FF00169";

// ── Transport & internal (FF0017x) ──

/// Operation was cancelled before completion.
pub const CANCELLED: &str = "FF00170";
/// Internal precondition violation.
pub const INTERNAL: &str = "FF00171";
/// Sink delivery failed with a transient condition.
pub const TRANSPORT_RETRYABLE: &str = "FF00172";
/// Sink delivery failed with a permanent condition.
pub const TRANSPORT_FATAL: &str = "FF00173";
