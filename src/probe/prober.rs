//! Single echo probe.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};

use super::{ProbeError, ProbeResult};
use crate::transport::{EchoHandle, MessageKind};

/// Default per-probe read timeout (3 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Performs one echo round-trip over a shared handle.
///
/// A probe never retries: a lost or failed probe is final for its sequence
/// number.
#[derive(Clone)]
pub struct Prober {
    handle: Arc<dyn EchoHandle>,
    timeout: Duration,
}

impl Prober {
    pub fn new(handle: Arc<dyn EchoHandle>, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send the request for `sequence` and classify what comes back.
    ///
    /// - no reply before `start + timeout`: lost
    /// - send failure, read failure, undecodable or unexpected reply: error
    /// - matching echo reply: success with the measured round-trip time
    pub async fn probe(&self, sequence: u64) -> ProbeResult {
        let start = Instant::now();
        let waiter = match self.handle.transmit(sequence).await {
            Ok(waiter) => waiter,
            Err(error) => {
                tracing::warn!(seq = sequence, error = %error, "Probe failed to send");
                return ProbeResult::error(sequence, error);
            }
        };

        let reply = match timeout_at(start + self.timeout, waiter).await {
            Err(_) => {
                tracing::debug!(
                    seq = sequence,
                    timeout_ms = self.timeout.as_millis(),
                    "Probe lost"
                );
                return ProbeResult::lost(sequence);
            }
            Ok(Err(_)) => Err(ProbeError::Read("handle closed before reply".to_string())),
            Ok(Ok(reply)) => reply,
        };

        let result = match reply {
            Err(error) => ProbeResult::error(sequence, error),
            Ok(reply) if reply.kind != MessageKind::EchoReply => ProbeResult::error(
                sequence,
                ProbeError::ProtocolMismatch(format!("unexpected message type: {:?}", reply.kind)),
            ),
            Ok(reply) if reply.sequence != sequence => ProbeResult::error(
                sequence,
                ProbeError::ProtocolMismatch(format!(
                    "reply sequence {} does not match request {}",
                    reply.sequence, sequence
                )),
            ),
            Ok(reply) => ProbeResult::success(reply.sequence, start.elapsed()),
        };

        match result.error_cause() {
            Some(error) => tracing::warn!(seq = sequence, error = %error, "Probe failed"),
            None => tracing::debug!(
                seq = sequence,
                latency_ms = result.latency_secs() * 1000.0,
                "Probe successful"
            ),
        }
        result
    }
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
