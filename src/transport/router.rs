//! Routes received datagrams to the probe waiting for them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use super::codec::{self, EchoMessage};
use super::{EchoReply, ReplyWaiter};
use crate::probe::ProbeError;

type ReplySender = oneshot::Sender<Result<EchoReply, ProbeError>>;

/// Pending waiters of one handle, keyed by sequence number.
#[derive(Debug)]
pub(crate) struct ReplyRouter {
    token: u32,
    pending: Mutex<HashMap<u64, ReplySender>>,
}

impl ReplyRouter {
    pub(crate) fn new(token: u32) -> Self {
        Self {
            token,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a waiter for `sequence`.
    ///
    /// Waiters abandoned by timed-out probes are pruned here.
    pub(crate) fn register(&self, sequence: u64) -> ReplyWaiter {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();
        pending.retain(|_, tx| !tx.is_closed());
        pending.insert(sequence, tx);
        rx
    }

    pub(crate) fn cancel(&self, sequence: u64) {
        self.lock().remove(&sequence);
    }

    /// Decode a datagram and hand it to its waiter.
    pub(crate) fn dispatch(&self, datagram: &[u8]) {
        let Some((token, sequence)) = codec::peek_header(datagram) else {
            tracing::trace!(len = datagram.len(), "Dropping undecodable datagram");
            return;
        };
        if token != self.token {
            tracing::trace!(token, sequence, "Dropping reply for another engine");
            return;
        }
        let Some(tx) = self.lock().remove(&sequence) else {
            tracing::trace!(sequence, "Dropping reply with no pending probe");
            return;
        };

        let reply = EchoMessage::decode(datagram)
            .map(|msg| EchoReply {
                sequence: msg.sequence,
                kind: msg.kind,
            })
            .map_err(|e| ProbeError::Parse(e.to_string()));
        // The probe may have given up already.
        let _ = tx.send(reply);
    }

    /// Fail every pending waiter with the same error.
    pub(crate) fn fail_all(&self, error: &ProbeError) {
        for (_, tx) in self.lock().drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ReplySender>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
