//! Application configuration

use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default pending-operation deadline
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30000; // 30 seconds

/// App configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Deadline for deferred handlers and middleware
    pub request_timeout_ms: u64,
    /// Put handler error messages in 500 bodies instead of the generic text
    pub expose_errors: bool,
    /// Log every dispatched request at info level
    pub log_requests: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            expose_errors: false,
            log_requests: false,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a (possibly partial) camelCase JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn expose_errors(mut self) -> Self {
        self.expose_errors = true;
        self
    }

    pub fn log_requests(mut self) -> Self {
        self.log_requests = true;
        self
    }

    /// Effective timeout for a boundary call; 0 means the configured default
    pub fn timeout_for(&self, timeout_ms: u64) -> Duration {
        if timeout_ms == 0 {
            Duration::from_millis(self.request_timeout_ms)
        } else {
            Duration::from_millis(timeout_ms)
        }
    }
}
