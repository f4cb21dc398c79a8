//! Scripted handles for exercising probes without a network.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use super::{Connector, EchoHandle, EchoReply, MessageKind, ReplyWaiter};
use crate::probe::ProbeError;

type ReplySender = oneshot::Sender<Result<EchoReply, ProbeError>>;

/// What the handle does with the request for one sequence number.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Reply after `delay` with the given kind, optionally rewriting the sequence.
    Reply {
        delay: Duration,
        kind: MessageKind,
        sequence: Option<u64>,
    },
    /// Never reply.
    Silent,
    /// Fail the send.
    TransmitFail(String),
    /// Fail the read after `delay`.
    Fail { delay: Duration, error: ProbeError },
}

impl Script {
    pub(crate) fn reply_after(delay: Duration) -> Self {
        Self::Reply {
            delay,
            kind: MessageKind::EchoReply,
            sequence: None,
        }
    }
}

pub(crate) struct ScriptedHandle {
    script: Box<dyn Fn(u64) -> Script + Send + Sync>,
    inflight: Arc<Mutex<HashMap<u64, ReplySender>>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fail_close: bool,
    transmitted: Mutex<Vec<u64>>,
}

impl ScriptedHandle {
    pub(crate) fn new(script: impl Fn(u64) -> Script + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self::build(script, false))
    }

    pub(crate) fn failing_close(
        script: impl Fn(u64) -> Script + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self::build(script, true))
    }

    fn build(script: impl Fn(u64) -> Script + Send + Sync + 'static, fail_close: bool) -> Self {
        Self {
            script: Box::new(script),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            fail_close,
            transmitted: Mutex::new(Vec::new()),
        }
    }

    /// Always replies after `delay`.
    pub(crate) fn echo(delay: Duration) -> Arc<Self> {
        Self::new(move |_| Script::reply_after(delay))
    }

    /// Never replies.
    pub(crate) fn silent() -> Arc<Self> {
        Self::new(|_| Script::Silent)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn transmitted(&self) -> Vec<u64> {
        self.transmitted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EchoHandle for ScriptedHandle {
    async fn transmit(&self, sequence: u64) -> Result<ReplyWaiter, ProbeError> {
        if self.is_closed() {
            return Err(ProbeError::Transmit("handle closed".to_string()));
        }
        self.transmitted.lock().unwrap().push(sequence);

        let script = (self.script)(sequence);
        let (tx, rx) = oneshot::channel();
        let (delay, reply) = match script {
            Script::TransmitFail(cause) => return Err(ProbeError::Transmit(cause)),
            Script::Silent => {
                self.inflight.lock().unwrap().insert(sequence, tx);
                return Ok(rx);
            }
            Script::Reply {
                delay,
                kind,
                sequence: rewritten,
            } => (
                delay,
                Ok(EchoReply {
                    sequence: rewritten.unwrap_or(sequence),
                    kind,
                }),
            ),
            Script::Fail { delay, error } => (delay, Err(error)),
        };

        self.inflight.lock().unwrap().insert(sequence, tx);
        let inflight = Arc::clone(&self.inflight);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let tx = inflight.lock().unwrap().remove(&sequence);
            if let Some(tx) = tx {
                let _ = tx.send(reply);
            }
        });
        Ok(rx)
    }

    async fn close(&self) -> io::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.inflight.lock().unwrap().clear();
        if self.fail_close {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }
}

/// Hands out one shared [`ScriptedHandle`], or fails to connect.
pub(crate) struct ScriptedConnector {
    handle: Option<Arc<ScriptedHandle>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub(crate) fn new(handle: Arc<ScriptedHandle>) -> Self {
        Self {
            handle: Some(handle),
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn refusing() -> Self {
        Self {
            handle: None,
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _target: SocketAddr,
        _token: u32,
        _timeout: Duration,
    ) -> io::Result<Arc<dyn EchoHandle>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.handle {
            Some(handle) => Ok(Arc::clone(handle) as Arc<dyn EchoHandle>),
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
        }
    }
}
