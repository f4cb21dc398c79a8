//! UDP echo transport.
//!
//! Probes share one connected socket. A single receive task reads every
//! datagram and routes it by sequence number, so concurrent probes never
//! consume each other's replies.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::codec::{DEFAULT_PAYLOAD_SIZE, EchoMessage, MAX_DATAGRAM_SIZE};
use super::router::ReplyRouter;
use super::{Connector, EchoHandle, ReplyWaiter};
use crate::probe::ProbeError;

/// Opens [`UdpEchoHandle`]s.
#[derive(Debug, Clone)]
pub struct UdpConnector {
    payload_size: usize,
}

impl Default for UdpConnector {
    fn default() -> Self {
        Self {
            payload_size: DEFAULT_PAYLOAD_SIZE,
        }
    }
}

impl UdpConnector {
    /// Set the request padding size.
    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }
}

#[async_trait::async_trait]
impl Connector for UdpConnector {
    async fn connect(
        &self,
        target: SocketAddr,
        token: u32,
        _timeout: Duration,
    ) -> io::Result<Arc<dyn EchoHandle>> {
        let handle = UdpEchoHandle::connect(target, token, self.payload_size).await?;
        Ok(Arc::new(handle))
    }
}

/// UDP echo handle with a demultiplexing receive loop.
pub struct UdpEchoHandle {
    socket: Arc<UdpSocket>,
    router: Arc<ReplyRouter>,
    token: u32,
    payload_size: usize,
    shutdown: watch::Sender<bool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl UdpEchoHandle {
    /// Bind an ephemeral local port, connect it to `target` and start receiving.
    pub async fn connect(target: SocketAddr, token: u32, payload_size: usize) -> io::Result<Self> {
        let local = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        tracing::debug!(peer = %target, local = %socket.local_addr()?, "UDP echo handle connected");

        let socket = Arc::new(socket);
        let router = Arc::new(ReplyRouter::new(token));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            Arc::clone(&router),
            shutdown_rx,
        ));

        Ok(Self {
            socket,
            router,
            token,
            payload_size,
            shutdown,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl std::fmt::Debug for UdpEchoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpEchoHandle")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("peer_addr", &self.socket.peer_addr().ok())
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl EchoHandle for UdpEchoHandle {
    async fn transmit(&self, sequence: u64) -> Result<ReplyWaiter, ProbeError> {
        if *self.shutdown.borrow() {
            return Err(ProbeError::Transmit("handle closed".to_string()));
        }
        let bytes = EchoMessage::request(self.token, sequence, self.payload_size)
            .encode()
            .map_err(|e| ProbeError::Transmit(e.to_string()))?;

        // Register before sending so a fast reply cannot race the waiter.
        let waiter = self.router.register(sequence);
        if let Err(e) = self.socket.send(&bytes).await {
            self.router.cancel(sequence);
            return Err(ProbeError::Transmit(e.to_string()));
        }
        Ok(waiter)
    }

    async fn close(&self) -> io::Result<()> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(receiver) = receiver else {
            return Ok(());
        };

        self.shutdown.send_replace(true);
        let joined = receiver.await;
        self.router.fail_all(&ProbeError::Read("handle closed".to_string()));
        joined.map_err(io::Error::other)
    }
}

impl Drop for UdpEchoHandle {
    fn drop(&mut self) {
        if let Some(receiver) = self
            .receiver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            receiver.abort();
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    router: Arc<ReplyRouter>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv(&mut buf) => match received {
                Ok(len) => router.dispatch(&buf[..len]),
                // ECONNREFUSED and the like cannot be tied to one sequence.
                // Waiters keep running to their own deadlines.
                Err(e) => tracing::warn!(error = %e, "UDP echo receive failed"),
            },
        }
    }
    tracing::debug!("UDP echo receive loop stopped");
}
