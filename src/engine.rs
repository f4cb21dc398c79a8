//! Probing engine lifecycle.
//!
//! The engine owns the network handle and the sequence counter. While running,
//! one task runs a [`ProbeRound`] every `interval` and hands each completed
//! round to the callback.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{ConfigError, EngineConfig};
use crate::error::EngineError;
use crate::probe::{ProbeRound, ProbeState, RoundResult};
use crate::transport::{Connector, EchoHandle, connector_for, identity_token, resolve_target};

/// How long the loop task gets to unwind after the handle was closed under a
/// round that overran the stop bound.
const ABORT_GRACE: Duration = Duration::from_millis(250);

/// Receives every completed round, on the engine's loop task.
pub type RoundCallback = Box<dyn FnMut(RoundResult) + Send + 'static>;

/// Lifecycle state of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

struct Running {
    handle: Arc<dyn EchoHandle>,
    target: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodic latency prober for one target.
///
/// # Example
///
/// ```rust,no_run
/// use pathwatch::{Engine, EngineConfig, Protocol};
///
/// # async fn run() -> Result<(), pathwatch::EngineError> {
/// let config = EngineConfig::new("192.0.2.1").with_protocol(Protocol::Udp { port: 7007 });
/// let mut engine = Engine::new(config);
/// engine
///     .start_with(|round| {
///         for probe in round.results() {
///             println!("{} {}", probe.sequence(), probe.state());
///         }
///     })
///     .await?;
/// // ...
/// engine.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    state: EngineState,
    sequence: Arc<AtomicU64>,
    rounds: Arc<AtomicU64>,
    token: u32,
    running: Option<Running>,
}

impl Engine {
    /// Create an engine using the transport selected by `config.protocol`.
    pub fn new(config: EngineConfig) -> Self {
        let connector = connector_for(config.protocol);
        Self::with_connector(config, connector)
    }

    /// Create an engine with a custom connector.
    pub fn with_connector(config: EngineConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            state: EngineState::Stopped,
            sequence: Arc::new(AtomicU64::new(0)),
            rounds: Arc::new(AtomicU64::new(0)),
            token: identity_token(),
            running: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolved target address, while running.
    pub fn target_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.target)
    }

    /// Rounds delivered since the engine was created.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Identity token carried in every request of this engine.
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Start probing, discarding round results.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        self.start_inner(None).await
    }

    /// Start probing and deliver each round to `callback`.
    ///
    /// A panic in `callback` is logged and loses only that round.
    ///
    /// # Errors
    /// - `AlreadyRunning` if the engine is not stopped
    /// - `InvalidConfig`, `Resolution` or `Connection` if startup fails; the
    ///   engine stays stopped
    pub async fn start_with<F>(&mut self, callback: F) -> Result<(), EngineError>
    where
        F: FnMut(RoundResult) + Send + 'static,
    {
        self.start_inner(Some(Box::new(callback))).await
    }

    async fn start_inner(&mut self, callback: Option<RoundCallback>) -> Result<(), EngineError> {
        if self.state != EngineState::Stopped {
            return Err(EngineError::AlreadyRunning);
        }
        self.config.validate()?;
        let samples = NonZeroUsize::new(self.config.samples)
            .ok_or_else(|| ConfigError::ValidationError("samples must be positive".to_string()))?;

        self.state = EngineState::Starting;
        let (target, handle) = match self.open().await {
            Ok(opened) => opened,
            Err(e) => {
                self.state = EngineState::Stopped;
                tracing::error!(host = %self.config.target, error = %e, "Engine failed to start");
                return Err(e);
            }
        };

        // A round aborted at stop may leave the counter mid-round.
        let n = samples.get() as u64;
        let current = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(current.div_ceil(n) * n, Ordering::Relaxed);

        let round = ProbeRound::new(
            Arc::clone(&handle),
            Arc::clone(&self.sequence),
            samples,
            self.config.spacing,
            self.config.timeout,
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(round_loop(
            round,
            self.config.interval,
            Arc::clone(&self.rounds),
            callback,
            shutdown_rx,
        ));

        self.running = Some(Running {
            handle,
            target,
            shutdown,
            task,
        });
        self.state = EngineState::Running;
        tracing::info!(
            host = %self.config.target,
            addr = %target,
            protocol = %self.config.protocol,
            interval_ms = self.config.interval.as_millis(),
            samples = samples.get(),
            "Engine started"
        );
        Ok(())
    }

    async fn open(&self) -> Result<(SocketAddr, Arc<dyn EchoHandle>), EngineError> {
        let target = resolve_target(&self.config.target, self.config.protocol.port())
            .await
            .map_err(|source| EngineError::Resolution {
                target: self.config.target.clone(),
                source,
            })?;
        let handle = self
            .connector
            .connect(target, self.token, self.config.timeout)
            .await
            .map_err(EngineError::Connection)?;
        Ok((target, handle))
    }

    /// Stop probing.
    ///
    /// Waits for the in-flight round to be delivered, up to
    /// `shutdown_timeout`, then closes the handle. Past the bound the handle
    /// is closed under the round and the loop task is aborted.
    ///
    /// # Errors
    /// - `NotRunning` if the engine is not running
    /// - `HandleClose` if the handle failed to close; the engine is stopped anyway
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        let Some(Running {
            handle,
            target,
            shutdown,
            mut task,
        }) = self.running.take()
        else {
            return Err(EngineError::NotRunning);
        };

        self.state = EngineState::Stopping;
        tracing::info!(addr = %target, "Engine stopping");
        shutdown.send_replace(true);

        let mut closed = None;
        match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Round loop task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis(),
                    "Round loop did not finish in time, closing handle"
                );
                closed = Some(handle.close().await);
                if tokio::time::timeout(ABORT_GRACE, &mut task).await.is_err() {
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        let closed = match closed {
            Some(result) => result,
            None => handle.close().await,
        };
        self.state = EngineState::Stopped;

        match closed {
            Ok(()) => {
                tracing::info!(addr = %target, rounds = self.rounds_completed(), "Engine stopped");
                Ok(())
            }
            Err(e) => {
                tracing::error!(addr = %target, error = %e, "Failed to close handle");
                Err(EngineError::HandleClose(e))
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.send_replace(true);
            running.task.abort();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("token", &self.token)
            .field("target_addr", &self.target_addr())
            .finish_non_exhaustive()
    }
}

async fn round_loop(
    round: ProbeRound,
    interval: Duration,
    rounds: Arc<AtomicU64>,
    mut callback: Option<RoundCallback>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let started = Instant::now();
        let result = round.run().await;
        let completed = rounds.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            round = completed,
            success = result.count(ProbeState::Success),
            lost = result.count(ProbeState::Lost),
            errors = result.count(ProbeState::Error),
            elapsed_ms = started.elapsed().as_millis(),
            "Round complete"
        );
        if let Some(callback) = callback.as_mut() {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| callback(result)));
            if delivered.is_err() {
                tracing::error!(round = completed, "Round callback panicked");
            }
        }

        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(started + interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("Round loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeError;
    use crate::transport::mock::{ScriptedConnector, ScriptedHandle};
    use tokio::sync::mpsc;

    fn config() -> EngineConfig {
        EngineConfig::new("127.0.0.1")
            .with_interval(Duration::from_secs(1))
            .with_samples(3)
            .with_spacing(Duration::ZERO)
    }

    fn collector() -> (
        impl FnMut(RoundResult) + Send + 'static,
        mpsc::UnboundedReceiver<(Instant, RoundResult)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback = move |round: RoundResult| {
            let _ = tx.send((Instant::now(), round));
        };
        (callback, rx)
    }

    #[tokio::test]
    async fn test_unresolvable_target() {
        let connector = Arc::new(ScriptedConnector::new(ScriptedHandle::silent()));
        let mut engine = Engine::with_connector(
            EngineConfig::new("not-a-real-host.invalid"),
            Arc::clone(&connector) as Arc<dyn Connector>,
        );

        let err = engine.start().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Resolution { ref target, .. } if target == "not-a-real-host.invalid"
        ));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(connector.connects(), 0);
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
    }

    #[tokio::test]
    async fn test_stop_when_stopped() {
        let mut engine = Engine::with_connector(
            config(),
            Arc::new(ScriptedConnector::new(ScriptedHandle::silent())),
        );
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let mut engine = Engine::with_connector(config(), Arc::new(ScriptedConnector::refusing()));

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.target_addr().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut engine = Engine::with_connector(
            config().with_samples(0),
            Arc::new(ScriptedConnector::new(ScriptedHandle::silent())),
        );
        assert!(matches!(
            engine.start().await,
            Err(EngineError::InvalidConfig(_))
        ));
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice() {
        let mut engine = Engine::with_connector(
            config(),
            Arc::new(ScriptedConnector::new(ScriptedHandle::echo(Duration::from_millis(5)))),
        );
        engine.start().await.unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(matches!(
            engine.start().await,
            Err(EngineError::AlreadyRunning)
        ));

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rounds_delivered_in_sequence() {
        let handle = ScriptedHandle::echo(Duration::from_millis(10));
        let mut engine = Engine::with_connector(
            config(),
            Arc::new(ScriptedConnector::new(Arc::clone(&handle))),
        );
        let (callback, mut rx) = collector();
        engine.start_with(callback).await.unwrap();
        assert_eq!(engine.target_addr(), Some("127.0.0.1:0".parse().unwrap()));

        let mut sequences = Vec::new();
        for _ in 0..3 {
            let (_, round) = rx.recv().await.unwrap();
            assert_eq!(round.len(), 3);
            assert_eq!(round.count(ProbeState::Success), 3);
            sequences.extend(round.results().iter().map(|p| p.sequence()));
        }
        assert_eq!(sequences, (1..=9).collect::<Vec<u64>>());

        engine.stop().await.unwrap();
        assert!(handle.is_closed());
        assert_eq!(handle.close_calls(), 1);
        assert!(engine.rounds_completed() >= 3);
        assert!(engine.target_addr().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rounds_start_on_fixed_cadence() {
        // Each round takes 500ms: two 100ms gaps plus a 300ms reply.
        let handle = ScriptedHandle::echo(Duration::from_millis(300));
        let mut engine = Engine::with_connector(
            config().with_spacing(Duration::from_millis(100)),
            Arc::new(ScriptedConnector::new(handle)),
        );
        let (callback, mut rx) = collector();
        engine.start_with(callback).await.unwrap();

        let mut delivered = Vec::new();
        for _ in 0..4 {
            delivered.push(rx.recv().await.unwrap().0);
        }
        engine.stop().await.unwrap();

        for pair in delivered.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= Duration::from_secs(1) && gap < Duration::from_millis(1010),
                "rounds drifted: {gap:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_panic_keeps_rounds_coming() {
        let handle = ScriptedHandle::echo(Duration::from_millis(10));
        let mut engine = Engine::with_connector(
            config(),
            Arc::new(ScriptedConnector::new(Arc::clone(&handle))),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut calls = 0;
        engine
            .start_with(move |round: RoundResult| {
                calls += 1;
                if calls == 1 {
                    panic!("callback failure on the first round");
                }
                let _ = tx.send(round);
            })
            .await
            .unwrap();

        let round = rx.recv().await.unwrap();
        assert_eq!(round.results()[0].sequence(), 4);
        assert_eq!(engine.state(), EngineState::Running);

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(handle.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_callback() {
        let mut engine = Engine::with_connector(
            config(),
            Arc::new(ScriptedConnector::new(ScriptedHandle::echo(Duration::from_millis(5)))),
        );
        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        engine.stop().await.unwrap();

        assert_eq!(engine.rounds_completed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_round() {
        let handle = ScriptedHandle::silent();
        let mut engine = Engine::with_connector(
            config().with_timeout(Duration::from_secs(2)),
            Arc::new(ScriptedConnector::new(Arc::clone(&handle))),
        );
        let (callback, mut rx) = collector();
        engine.start_with(callback).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        engine.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let (_, round) = rx.recv().await.unwrap();
        assert_eq!(round.count(ProbeState::Lost), 3);
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_bounded_by_shutdown_timeout() {
        let handle = ScriptedHandle::silent();
        let mut engine = Engine::with_connector(
            config()
                .with_timeout(Duration::from_secs(30))
                .with_shutdown_timeout(Duration::from_secs(1)),
            Arc::new(ScriptedConnector::new(Arc::clone(&handle))),
        );
        let (callback, mut rx) = collector();
        engine.start_with(callback).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        engine.stop().await.unwrap();
        assert!(started.elapsed() <= Duration::from_secs(1) + ABORT_GRACE);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(handle.is_closed());
        assert_eq!(handle.close_calls(), 1);

        // Closing the handle failed the waiting probes, so the round was still delivered.
        let (_, round) = rx.recv().await.unwrap();
        assert_eq!(round.len(), 3);
        for probe in round.results() {
            assert!(matches!(probe.error_cause(), Some(ProbeError::Read(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_error_is_reported() {
        let handle = ScriptedHandle::failing_close(|_| {
            crate::transport::mock::Script::reply_after(Duration::from_millis(5))
        });
        let mut engine =
            Engine::with_connector(config(), Arc::new(ScriptedConnector::new(handle)));
        engine.start().await.unwrap();

        assert!(matches!(
            engine.stop().await,
            Err(EngineError::HandleClose(_))
        ));
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reconnects() {
        let connector = Arc::new(ScriptedConnector::new(ScriptedHandle::echo(
            Duration::from_millis(5),
        )));
        let mut engine =
            Engine::with_connector(config(), Arc::clone(&connector) as Arc<dyn Connector>);

        engine.start().await.unwrap();
        engine.stop().await.unwrap();
        engine.start().await.unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(connector.connects(), 2);
        engine.stop().await.unwrap();
    }

    #[test]
    fn test_tokens_differ_between_engines() {
        let connector: Arc<dyn Connector> = Arc::new(ScriptedConnector::refusing());
        let a = Engine::with_connector(config(), Arc::clone(&connector));
        let b = Engine::with_connector(config(), connector);
        assert_ne!(a.token(), b.token());
        assert_eq!(a.token() & 0xFFFF, b.token() & 0xFFFF);
    }
}
