//! Poll configuration and per-call wait options.
//!
//! ```yaml
//! # tarry.yaml
//! interval_ms: 50
//! timeout_ms: 2000   # 0 or absent: use the client's ambient timeout
//! ```

use crate::result::{TarryError, TarryResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default time between predicate evaluations (100ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Timeout value meaning "inherit the client's ambient timeout"
pub const INHERIT_TIMEOUT: u64 = 0;

// =============================================================================
// POLL CONFIG
// =============================================================================

/// Interval and timeout for one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// Time between predicate evaluations in milliseconds
    pub interval_ms: u64,
    /// Budget from poll start in milliseconds, `0` to inherit
    pub timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_ms: INHERIT_TIMEOUT,
        }
    }
}

impl PollConfig {
    /// Create a config with default interval that inherits the ambient timeout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the explicit timeout override
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub const fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Get interval as Duration
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// The explicit timeout override, if one is set
    #[must_use]
    pub const fn timeout_override(&self) -> Option<Duration> {
        if self.timeout_ms == INHERIT_TIMEOUT {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }

    /// Reject configurations the poller cannot run
    pub fn validate(&self) -> TarryResult<()> {
        if self.interval_ms == 0 {
            return Err(TarryError::config("interval_ms must be greater than zero"));
        }
        Ok(())
    }

    /// Apply per-call options on top of this config
    #[must_use]
    pub fn merged(&self, options: &WaitOptions) -> Self {
        Self {
            interval_ms: options.interval_ms.unwrap_or(self.interval_ms),
            timeout_ms: options.timeout_ms.unwrap_or(self.timeout_ms),
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> TarryResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| TarryError::config(format!("invalid poll config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> TarryResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }
}

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// Per-call options accepted by every waiter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitOptions {
    /// Timeout override in milliseconds
    pub timeout_ms: Option<u64>,
    /// Poll interval override in milliseconds
    pub interval_ms: Option<u64>,
}

impl WaitOptions {
    /// No overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval_ms = Some(interval_ms);
        self
    }
}
