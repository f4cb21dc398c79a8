//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::history::BoundedHistory;
use crate::probe::{DEFAULT_TIMEOUT, RoundResult};

/// Default time between round starts (5 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of probes per round.
pub const DEFAULT_SAMPLES: usize = 3;

/// Default gap between probe launches within a round (100 milliseconds).
pub const DEFAULT_SPACING: Duration = Duration::from_millis(100);

/// Default bound on waiting for the in-flight round at stop (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default port of the UDP echo responder.
pub const DEFAULT_UDP_PORT: u16 = 7007;

/// Largest round history a retention window may ask for.
pub const MAX_HISTORY_CAPACITY: usize = 1_000_000;

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_samples() -> usize {
    DEFAULT_SAMPLES
}

fn default_spacing() -> Duration {
    DEFAULT_SPACING
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}

/// Echo transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Protocol {
    /// ICMP echo. Needs raw or unprivileged ICMP sockets.
    #[default]
    Icmp,
    /// UDP echo against a pathwatch responder.
    Udp {
        #[serde(default = "default_udp_port")]
        port: u16,
    },
}

impl Protocol {
    /// Port used when resolving the target; `0` for ICMP.
    pub fn port(&self) -> u16 {
        match self {
            Protocol::Icmp => 0,
            Protocol::Udp { port } => *port,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::Udp { port } => write!(f, "udp/{port}"),
        }
    }
}

/// Configuration for one probing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Target host (hostname or IP address).
    pub target: String,
    /// Echo transport (default: ICMP).
    #[serde(default)]
    pub protocol: Protocol,
    /// Time between round starts (default: 5s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Probes per round (default: 3).
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Gap between probe launches within a round (default: 100ms).
    #[serde(default = "default_spacing", with = "humantime_serde")]
    pub spacing: Duration,
    /// Per-probe read timeout (default: 3s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Window of rounds kept by callers that retain history.
    #[serde(default, with = "humantime_serde")]
    pub retention: Option<Duration>,
    /// Bound on waiting for the in-flight round when stopping (default: 5s).
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl EngineConfig {
    /// Create a configuration for `target` with default timing.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            protocol: Protocol::default(),
            interval: DEFAULT_INTERVAL,
            samples: DEFAULT_SAMPLES,
            spacing: DEFAULT_SPACING,
            timeout: DEFAULT_TIMEOUT,
            retention: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the transport.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the time between round starts.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the number of probes per round.
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    /// Set the gap between probe launches.
    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    /// Set the per-probe read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Set the stop bound.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "target must not be empty".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "interval must be positive".to_string(),
            ));
        }
        if self.samples == 0 {
            return Err(ConfigError::ValidationError(
                "samples must be positive".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "timeout must be positive".to_string(),
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "shutdown_timeout must be positive".to_string(),
            ));
        }
        if let Protocol::Udp { port: 0 } = self.protocol {
            return Err(ConfigError::ValidationError(
                "udp port must be non-zero".to_string(),
            ));
        }
        match self.history_capacity() {
            Some(rounds) if rounds > MAX_HISTORY_CAPACITY => {
                return Err(ConfigError::ValidationError(format!(
                    "retention needs {rounds} rounds of history, limit is {MAX_HISTORY_CAPACITY}"
                )));
            }
            _ => {}
        }
        Ok(())
    }

    /// Number of rounds a history covering `retention` must hold.
    ///
    /// `ceil(retention / interval) + 1`, saturating at `usize::MAX`, or `None`
    /// without a retention window.
    pub fn history_capacity(&self) -> Option<usize> {
        let retention = self.retention?;
        let interval = self.interval.as_nanos().max(1);
        let rounds = retention.as_nanos().div_ceil(interval);
        Some(
            usize::try_from(rounds)
                .unwrap_or(usize::MAX)
                .saturating_add(1),
        )
    }

    /// An empty history sized for the retention window.
    ///
    /// `None` without a retention window or when it needs more than
    /// [`MAX_HISTORY_CAPACITY`] rounds.
    pub fn new_history(&self) -> Option<BoundedHistory<RoundResult>> {
        self.history_capacity()
            .filter(|&rounds| rounds <= MAX_HISTORY_CAPACITY)
            .and_then(BoundedHistory::new)
    }
}
