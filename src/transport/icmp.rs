//! ICMP echo transport.
//!
//! Built on `surge-ping`: one [`Client`] per handle owns the ICMP socket and
//! a receive task that matches replies by identifier and sequence number.
//! Every transmitted request runs in a pinger task owned by the handle, which
//! ends when its waiter is dropped or the handle closes.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use surge_ping::{
    Client, Config, ICMP, IcmpPacket, PingIdentifier, PingSequence, Pinger, SurgeError,
};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use super::codec::DEFAULT_PAYLOAD_SIZE;
use super::{Connector, EchoHandle, EchoReply, MessageKind, ReplyWaiter};
use crate::probe::ProbeError;

/// Extra time the ping task waits past the probe deadline, so the probe
/// deadline always fires first.
const REPLY_GRACE: Duration = Duration::from_millis(500);

/// Opens [`IcmpEchoHandle`]s.
#[derive(Debug, Clone, Default)]
pub struct IcmpConnector;

#[async_trait::async_trait]
impl Connector for IcmpConnector {
    async fn connect(
        &self,
        target: SocketAddr,
        token: u32,
        timeout: Duration,
    ) -> io::Result<Arc<dyn EchoHandle>> {
        let handle = IcmpEchoHandle::connect(target.ip(), token, timeout)?;
        Ok(Arc::new(handle))
    }
}

/// ICMP echo handle.
pub struct IcmpEchoHandle {
    client: Mutex<Option<Client>>,
    tasks: Mutex<JoinSet<()>>,
    host: IpAddr,
    ident: PingIdentifier,
    timeout: Duration,
    payload: Arc<[u8]>,
}

impl IcmpEchoHandle {
    /// Open an ICMP socket for `host`.
    ///
    /// Uses an unprivileged datagram socket where the platform allows it.
    pub fn connect(host: IpAddr, token: u32, timeout: Duration) -> io::Result<Self> {
        let config = match host {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config)?;
        let ident = echo_identifier(token);
        tracing::debug!(host = %host, ident = ident.0, "ICMP echo handle opened");

        Ok(Self {
            client: Mutex::new(Some(client)),
            tasks: Mutex::new(JoinSet::new()),
            host,
            ident,
            timeout,
            payload: (0..DEFAULT_PAYLOAD_SIZE).map(|_| rand::random()).collect(),
        })
    }

    fn client(&self) -> Option<Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.tasks().len()
    }
}

impl std::fmt::Debug for IcmpEchoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcmpEchoHandle")
            .field("host", &self.host)
            .field("ident", &self.ident.0)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl EchoHandle for IcmpEchoHandle {
    async fn transmit(&self, sequence: u64) -> Result<ReplyWaiter, ProbeError> {
        let client = self
            .client()
            .ok_or_else(|| ProbeError::Transmit("handle closed".to_string()))?;
        let mut pinger = client.pinger(self.host, self.ident).await;
        pinger.timeout(self.timeout + REPLY_GRACE);

        let (tx, rx) = oneshot::channel();
        self.tasks()
            .spawn(await_reply(pinger, sequence, Arc::clone(&self.payload), tx));
        Ok(rx)
    }

    async fn close(&self) -> io::Result<()> {
        // Dropping the last client stops its receive task.
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if client.is_some() {
            // Aborted pingers drop their senders, so waiters fail at once.
            self.tasks().abort_all();
            tracing::debug!(host = %self.host, "ICMP echo handle closed");
        }
        Ok(())
    }
}

async fn await_reply(
    mut pinger: Pinger,
    sequence: u64,
    payload: Arc<[u8]>,
    mut tx: oneshot::Sender<Result<EchoReply, ProbeError>>,
) {
    let wire_seq = wire_sequence(sequence);
    let result = tokio::select! {
        // The waiter timed out or was dropped with its round.
        _ = tx.closed() => return,
        result = pinger.ping(wire_seq, &payload) => result,
    };
    let reply = match result {
        Ok((packet, _rtt)) => check_sequence(reply_sequence(&packet), wire_seq, sequence),
        // The probe deadline has already passed; dropping `tx` is enough.
        Err(SurgeError::Timeout { .. }) => return,
        Err(SurgeError::IOError(e)) => Err(ProbeError::Transmit(e.to_string())),
        Err(e @ SurgeError::MalformedPacket(_)) => Err(ProbeError::Parse(e.to_string())),
        Err(SurgeError::EchoRequestPacket) => Err(ProbeError::ProtocolMismatch(
            "unexpected message type: echo request".to_string(),
        )),
        Err(e) => Err(ProbeError::Read(e.to_string())),
    };
    let _ = tx.send(reply);
}

/// Fold a 32-bit identity token into the 16-bit ICMP identifier.
fn echo_identifier(token: u32) -> PingIdentifier {
    PingIdentifier((token as u16) ^ ((token >> 16) as u16))
}

/// ICMP carries 16-bit sequence numbers.
fn wire_sequence(sequence: u64) -> PingSequence {
    PingSequence(sequence as u16)
}

fn reply_sequence(packet: &IcmpPacket) -> PingSequence {
    match packet {
        IcmpPacket::V4(p) => p.get_sequence(),
        IcmpPacket::V6(p) => p.get_sequence(),
    }
}

fn check_sequence(
    received: PingSequence,
    expected: PingSequence,
    sequence: u64,
) -> Result<EchoReply, ProbeError> {
    if received != expected {
        return Err(ProbeError::ProtocolMismatch(format!(
            "reply sequence {} does not match request {}",
            received.0, expected.0
        )));
    }
    Ok(EchoReply {
        sequence,
        kind: MessageKind::EchoReply,
    })
}
