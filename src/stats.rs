//! Path quality summary over a window of rounds.

use std::time::Duration;

use serde::Serialize;

use crate::history::BoundedHistory;
use crate::probe::{ProbeState, RoundResult};

/// Loss, error and latency figures for a set of rounds.
///
/// Latency figures only consider successful probes and are `None` when there
/// were none. Jitter is the mean absolute difference between consecutive
/// successful latencies, in sequence order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowStats {
    pub rounds: usize,
    pub sent: usize,
    pub received: usize,
    pub lost: usize,
    pub errors: usize,
    #[serde(with = "humantime_serde")]
    pub min_latency: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub avg_latency: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub max_latency: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub jitter: Option<Duration>,
}

impl WindowStats {
    /// Summarize rounds given oldest-first.
    pub fn from_rounds<'a, I>(rounds: I) -> Self
    where
        I: IntoIterator<Item = &'a RoundResult>,
    {
        let mut stats = Self::default();
        let mut total = Duration::ZERO;
        let mut deltas = Duration::ZERO;
        let mut previous: Option<Duration> = None;

        for round in rounds {
            stats.rounds += 1;
            for probe in round.results() {
                stats.sent += 1;
                match probe.state() {
                    ProbeState::Lost => stats.lost += 1,
                    ProbeState::Error => stats.errors += 1,
                    ProbeState::Success => {
                        let latency = probe.latency();
                        stats.received += 1;
                        total += latency;
                        stats.min_latency =
                            Some(stats.min_latency.map_or(latency, |m| m.min(latency)));
                        stats.max_latency =
                            Some(stats.max_latency.map_or(latency, |m| m.max(latency)));
                        if let Some(prev) = previous {
                            deltas += prev.abs_diff(latency);
                        }
                        previous = Some(latency);
                    }
                }
            }
        }

        if stats.received > 0 {
            stats.avg_latency = Some(total / stats.received as u32);
        }
        if stats.received > 1 {
            stats.jitter = Some(deltas / (stats.received - 1) as u32);
        }
        stats
    }

    /// Fraction of sent probes that were lost, in `[0, 1]`.
    pub fn loss_rate(&self) -> f64 {
        ratio(self.lost, self.sent)
    }

    /// Fraction of sent probes that failed with an error, in `[0, 1]`.
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors, self.sent)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn millis(d: Option<Duration>) -> String {
    d.map_or_else(|| "-".to_string(), |d| format!("{:.3}ms", d.as_secs_f64() * 1000.0))
}

impl std::fmt::Display for WindowStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rounds={} sent={} received={} loss={:.1}% errors={:.1}% min={} avg={} max={} jitter={}",
            self.rounds,
            self.sent,
            self.received,
            self.loss_rate() * 100.0,
            self.error_rate() * 100.0,
            millis(self.min_latency),
            millis(self.avg_latency),
            millis(self.max_latency),
            millis(self.jitter),
        )
    }
}

impl BoundedHistory<RoundResult> {
    /// Summarize the retained window.
    pub fn summary(&self) -> WindowStats {
        WindowStats::from_rounds(self.iter())
    }
}
