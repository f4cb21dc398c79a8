//! UDP echo responder.
//!
//! Answers every decodable echo request with an echo reply carrying the same
//! token, sequence number and payload. Anything else is dropped.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::transport::codec::{EchoMessage, MAX_DATAGRAM_SIZE};
use crate::transport::MessageKind;

/// Default bind address of the responder.
pub const DEFAULT_BIND: &str = "0.0.0.0:7007";

/// UDP echo server for the UDP transport.
#[derive(Debug)]
pub struct Responder {
    socket: UdpSocket,
}

impl Responder {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve requests until `shutdown` completes.
    ///
    /// Returns the number of replies sent.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> io::Result<u64> {
        let local = self.local_addr()?;
        tracing::info!(addr = %local, "Echo responder listening");

        tokio::pin!(shutdown);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut served = 0u64;

        loop {
            let (len, peer) = tokio::select! {
                _ = &mut shutdown => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::warn!(error = %e, "Echo responder receive failed");
                        continue;
                    }
                },
            };

            let request = match EchoMessage::decode(&buf[..len]) {
                Ok(msg) if msg.kind == MessageKind::EchoRequest => msg,
                Ok(msg) => {
                    tracing::trace!(
                        peer = %peer,
                        kind = ?msg.kind,
                        "Ignoring non-request datagram"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::trace!(peer = %peer, len, error = %e, "Ignoring undecodable datagram");
                    continue;
                }
            };

            let reply = match request.reply().encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Failed to encode echo reply");
                    continue;
                }
            };
            match self.socket.send_to(&reply, peer).await {
                Ok(_) => served += 1,
                Err(e) => tracing::warn!(
                    peer = %peer,
                    seq = request.sequence,
                    error = %e,
                    "Failed to send echo reply"
                ),
            }
        }

        tracing::info!(addr = %local, served, "Echo responder stopped");
        Ok(served)
    }

    /// Run the responder on a background task.
    pub fn spawn(self) -> io::Result<ResponderHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        }));

        Ok(ResponderHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// Handle to a responder started with [`Responder::spawn`].
#[derive(Debug)]
pub struct ResponderHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<io::Result<u64>>,
}

impl ResponderHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the responder and wait for it to exit.
    ///
    /// Returns the number of replies sent.
    pub async fn shutdown(self) -> io::Result<u64> {
        self.shutdown.send_replace(true);
        self.task.await.map_err(io::Error::other)?
    }
}
