//! Network handles used by probes.
//!
//! A [`Connector`] opens an [`EchoHandle`] for a resolved target. One handle
//! is shared by every probe of an engine, so replies are never read by the
//! probes themselves: each handle routes incoming replies to the waiter
//! registered for their sequence number.
//!
//! - [`udp`]: UDP echo over a connected socket, with its own receive loop
//! - [`icmp`]: ICMP echo via `surge-ping`

pub mod codec;
pub mod icmp;
mod router;
pub mod udp;

#[cfg(test)]
pub(crate) mod mock;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::Protocol;
use crate::probe::ProbeError;

pub use codec::{EchoMessage, MessageKind};
pub use icmp::{IcmpConnector, IcmpEchoHandle};
pub use udp::{UdpConnector, UdpEchoHandle};

/// A reply routed to the probe that is waiting for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    /// Sequence number carried in the reply body.
    pub sequence: u64,
    /// Message type of the reply.
    pub kind: MessageKind,
}

/// Resolves once the reply for a transmitted probe has been routed.
///
/// The sender side is dropped when the handle closes, so a waiter never
/// outlives its handle.
pub type ReplyWaiter = oneshot::Receiver<Result<EchoReply, ProbeError>>;

/// Shared network handle for one engine.
#[async_trait::async_trait]
pub trait EchoHandle: Send + Sync + 'static {
    /// Register a waiter for `sequence` and transmit its echo request.
    ///
    /// Returns `ProbeError::Transmit` when the request could not be sent.
    async fn transmit(&self, sequence: u64) -> Result<ReplyWaiter, ProbeError>;

    /// Close the handle; pending waiters are dropped.
    ///
    /// Closing twice is a no-op.
    async fn close(&self) -> io::Result<()>;
}

/// Opens handles for a transport.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a handle to `target`.
    ///
    /// `token` identifies the engine in every request. `timeout` is the
    /// per-probe read timeout, for transports that need a bound of their own.
    async fn connect(
        &self,
        target: SocketAddr,
        token: u32,
        timeout: Duration,
    ) -> io::Result<Arc<dyn EchoHandle>>;
}

/// Default connector for a protocol.
pub fn connector_for(protocol: Protocol) -> Arc<dyn Connector> {
    match protocol {
        Protocol::Icmp => Arc::new(IcmpConnector::default()),
        Protocol::Udp { .. } => Arc::new(UdpConnector::default()),
    }
}

/// Resolve a hostname or IP literal to a socket address.
pub async fn resolve_target(host: &str, port: u16) -> io::Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for '{host}'"),
            )
        })
}

static ENGINE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Identity token for a new engine.
///
/// The low half comes from the process id, the high half from a per-process
/// counter, so two engines in one process never share a token.
pub fn identity_token() -> u32 {
    let instance = ENGINE_COUNTER.fetch_add(1, Ordering::Relaxed);
    (std::process::id() & 0xFFFF) | (instance << 16)
}
