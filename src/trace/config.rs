//! Configuration types for trace operations

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Echo requests sent per hop
pub const PROBES_PER_HOP: usize = 3;

/// Configuration for one trace run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Maximum number of hops (default: 30)
    pub max_hops: u8,
    /// Timeout for individual probes (default: 1000ms)
    pub probe_timeout: Duration,
    /// Look up PTR names of responding hops (default: true)
    pub resolve_hops: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_hops: 30,
            probe_timeout: Duration::from_millis(1000),
            resolve_hops: true,
        }
    }
}

impl TraceConfig {
    /// Create a new TraceConfig builder
    pub fn builder() -> TraceConfigBuilder {
        TraceConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_hops < 1 {
            return Err("max_hops must be at least 1".to_string());
        }
        if self.probe_timeout.is_zero() {
            return Err("probe_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Builder for TraceConfig
pub struct TraceConfigBuilder {
    config: TraceConfig,
}

impl TraceConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: TraceConfig::default(),
        }
    }

    /// Set the maximum number of hops
    pub fn max_hops(mut self, hops: u8) -> Self {
        self.config.max_hops = hops;
        self
    }

    /// Set the probe timeout
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    /// Enable or disable PTR lookups for hops
    pub fn resolve_hops(mut self, enable: bool) -> Self {
        self.config.resolve_hops = enable;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<TraceConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for TraceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
