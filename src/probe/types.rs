//! Probe and round result types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Why a single probe failed.
///
/// These are observations recorded in a [`ProbeResult`], never control flow:
/// a failed probe does not abort its round or the engine. A probe that simply
/// got no reply in time is [`ProbeOutcome::Lost`], not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "cause", rename_all = "snake_case")]
pub enum ProbeError {
    /// The request could not be sent.
    #[error("transmit error: {0}")]
    Transmit(String),

    /// Reading the reply failed for a reason other than the deadline.
    #[error("read error: {0}")]
    Read(String),

    /// The reply could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// A reply arrived but was not the expected echo reply.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
}

/// Classified outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The matching echo reply arrived.
    Success {
        #[serde(with = "humantime_serde")]
        latency: Duration,
    },
    /// No reply before the deadline.
    Lost,
    /// The exchange failed.
    Error { error: ProbeError },
}

/// Label of a [`ProbeOutcome`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Success,
    Lost,
    Error,
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Lost => write!(f, "lost"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// The result of one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    captured_at: DateTime<Utc>,
    sequence: u64,
    #[serde(flatten)]
    outcome: ProbeOutcome,
}

impl ProbeResult {
    /// Create a result captured now.
    pub fn new(sequence: u64, outcome: ProbeOutcome) -> Self {
        Self::captured(Utc::now(), sequence, outcome)
    }

    /// Create a result with an explicit capture time.
    pub fn captured(captured_at: DateTime<Utc>, sequence: u64, outcome: ProbeOutcome) -> Self {
        Self {
            captured_at,
            sequence,
            outcome,
        }
    }

    pub fn success(sequence: u64, latency: Duration) -> Self {
        Self::new(sequence, ProbeOutcome::Success { latency })
    }

    pub fn lost(sequence: u64) -> Self {
        Self::new(sequence, ProbeOutcome::Lost)
    }

    pub fn error(sequence: u64, error: ProbeError) -> Self {
        Self::new(sequence, ProbeOutcome::Error { error })
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// 1-based sequence number of the probe.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn outcome(&self) -> &ProbeOutcome {
        &self.outcome
    }

    pub fn state(&self) -> ProbeState {
        match self.outcome {
            ProbeOutcome::Success { .. } => ProbeState::Success,
            ProbeOutcome::Lost => ProbeState::Lost,
            ProbeOutcome::Error { .. } => ProbeState::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Success { .. })
    }

    /// Round-trip latency; zero unless the probe succeeded.
    pub fn latency(&self) -> Duration {
        match self.outcome {
            ProbeOutcome::Success { latency } => latency,
            _ => Duration::ZERO,
        }
    }

    /// Round-trip latency in seconds; zero unless the probe succeeded.
    pub fn latency_secs(&self) -> f64 {
        self.latency().as_secs_f64()
    }

    pub fn error_cause(&self) -> Option<&ProbeError> {
        match &self.outcome {
            ProbeOutcome::Error { error } => Some(error),
            _ => None,
        }
    }
}

/// All probe results of one round, ordered by sequence number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundResult {
    timestamp: DateTime<Utc>,
    results: Vec<ProbeResult>,
}

impl RoundResult {
    pub(crate) fn new(timestamp: DateTime<Utc>, results: Vec<ProbeResult>) -> Self {
        Self { timestamp, results }
    }

    /// When the round started.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ProbeResult> {
        self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn count(&self, state: ProbeState) -> usize {
        self.results.iter().filter(|r| r.state() == state).count()
    }
}

/// Slot of sequence `seq` within a round of `samples` probes.
pub(crate) fn slot_index(seq: u64, samples: usize) -> usize {
    (seq.saturating_sub(1) % samples as u64) as usize
}
