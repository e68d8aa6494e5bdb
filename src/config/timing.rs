//! Timing configuration with compile-time defaults and runtime overrides
//!
//! Default values are compile-time constants. A process may install one
//! override at startup (from the CLI or a library caller) with [`set_config`];
//! every [`TimingConfig::current`] call afterwards returns that override.

use once_cell::sync::OnceCell;
use std::time::Duration;

// Compile-time defaults as public constants (in milliseconds)
/// Deadline for a single echo exchange issued by the prober
pub const DEFAULT_PROBE_DEADLINE_MS: u64 = 4000;
/// Delay between two probes of the same continuous-ping target
pub const DEFAULT_PING_INTERVAL_MS: u64 = 1000;
/// Delay between two runs of the repeating tracer
pub const DEFAULT_TRACE_REPEAT_DELAY_MS: u64 = 5000;
/// Settle time between the end of a trace and the start of hop pinging
pub const DEFAULT_PINGPATH_GRACE_MS: u64 = 3000;
/// Interval at which a non-blocking ICMP socket is polled for replies
pub const DEFAULT_SOCKET_POLL_INTERVAL_MS: u64 = 1;
/// Upper bound on how long a superseded operation is given to wind down
pub const DEFAULT_ABANDON_TIMEOUT_MS: u64 = 5000;

/// Number of history columns in a continuous-ping window
pub const DEFAULT_PING_COLUMNS: usize = 14;
/// Maximum number of DNS lookups in flight for one batch
pub const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 64;

// Runtime override storage - set once at program startup
static OVERRIDE_CONFIG: OnceCell<TimingConfig> = OnceCell::new();

/// Timing and sizing knobs shared by every component of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Deadline for a single echo exchange
    pub probe_deadline: Duration,
    /// Delay between two probes to the same continuous-ping target
    pub ping_interval: Duration,
    /// Delay between two runs of the repeating tracer
    pub trace_repeat_delay: Duration,
    /// Settle time before a ping-path switches from tracing to pinging
    pub pingpath_grace: Duration,
    /// Poll interval for non-blocking ICMP sockets
    pub socket_poll_interval: Duration,
    /// How long a new operation waits for the previous one to drain
    pub abandon_timeout: Duration,
    /// Columns in the rolling continuous-ping window
    pub ping_columns: usize,
    /// Cap on concurrent DNS lookups per batch
    pub max_concurrent_lookups: usize,
}

impl TimingConfig {
    /// The compile-time defaults, ignoring any installed override
    pub fn defaults() -> Self {
        Self {
            probe_deadline: Duration::from_millis(DEFAULT_PROBE_DEADLINE_MS),
            ping_interval: Duration::from_millis(DEFAULT_PING_INTERVAL_MS),
            trace_repeat_delay: Duration::from_millis(DEFAULT_TRACE_REPEAT_DELAY_MS),
            pingpath_grace: Duration::from_millis(DEFAULT_PINGPATH_GRACE_MS),
            socket_poll_interval: Duration::from_millis(DEFAULT_SOCKET_POLL_INTERVAL_MS),
            abandon_timeout: Duration::from_millis(DEFAULT_ABANDON_TIMEOUT_MS),
            ping_columns: DEFAULT_PING_COLUMNS,
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
        }
    }

    /// The installed override, or the defaults when none was set
    pub fn current() -> Self {
        OVERRIDE_CONFIG.get().cloned().unwrap_or_else(Self::defaults)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.probe_deadline.is_zero() {
            return Err("probe_deadline must be greater than 0".to_string());
        }
        if self.socket_poll_interval.is_zero() {
            return Err("socket_poll_interval must be greater than 0".to_string());
        }
        if self.ping_columns == 0 {
            return Err("ping_columns must be at least 1".to_string());
        }
        if self.max_concurrent_lookups == 0 {
            return Err("max_concurrent_lookups must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self::current()
    }
}

/// Install the process-wide timing override
///
/// This should be called once at program startup if custom timing is needed.
/// Returns the rejected configuration if an override was already installed.
pub fn set_config(config: TimingConfig) -> Result<(), TimingConfig> {
    OVERRIDE_CONFIG.set(config)
}

/// Check if custom timing configuration has been set
pub fn is_custom_config_set() -> bool {
    OVERRIDE_CONFIG.get().is_some()
}
