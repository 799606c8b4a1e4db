//! Engine and scheduler tuning loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

/// Default bound on a single dispatcher call.
const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 10;

/// Default number of failed dispatches before an item or digest is given up on.
const DEFAULT_MAX_DELIVERY_ATTEMPTS: i32 = 5;

/// Default scheduler tick.
const DEFAULT_DIGEST_CHECK_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on one `deliver` call; expiry counts as a failed dispatch.
    pub dispatch_timeout: Duration,
    /// Failed dispatches tolerated per item or digest before it is
    /// surfaced as an operational alert.
    pub max_delivery_attempts: i32,
    /// How often the digest scheduler sweeps.
    pub digest_check_interval: Duration,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Unparseable values fall back to the default.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `DISPATCH_TIMEOUT_SECS`      | `10`    |
    /// | `MAX_DELIVERY_ATTEMPTS`      | `5`     |
    /// | `DIGEST_CHECK_INTERVAL_SECS` | `300`   |
    pub fn from_env() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(env_or(
                "DISPATCH_TIMEOUT_SECS",
                DEFAULT_DISPATCH_TIMEOUT_SECS,
            )),
            max_delivery_attempts: env_or("MAX_DELIVERY_ATTEMPTS", DEFAULT_MAX_DELIVERY_ATTEMPTS)
                .max(1),
            digest_check_interval: Duration::from_secs(
                env_or("DIGEST_CHECK_INTERVAL_SECS", DEFAULT_DIGEST_CHECK_INTERVAL_SECS).max(1),
            ),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(DEFAULT_DISPATCH_TIMEOUT_SECS),
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            digest_check_interval: Duration::from_secs(DEFAULT_DIGEST_CHECK_INTERVAL_SECS),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting, using default");
            default
        }),
        Err(_) => default,
    }
}
