//! pathwatch - periodic network path quality probing
//!
//! An [`Engine`] sends a burst of echo probes to one target on a fixed
//! cadence, correlates the replies out of order, classifies every probe as
//! success, loss or error, and hands each completed [`RoundResult`] to a
//! callback.
//!
//! # Architecture
//!
//! - **Transport**: ICMP echo (`surge-ping`) or UDP echo against a
//!   [`Responder`], behind the [`Connector`]/[`EchoHandle`] seam
//! - **Probe**: [`Prober`] runs one exchange, [`ProbeRound`] runs N of them
//! - **Engine**: lifecycle and drift-free scheduling of rounds
//! - **History**: [`BoundedHistory`] keeps a sliding window of rounds,
//!   summarized by [`WindowStats`]
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use pathwatch::{Engine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::new("192.0.2.1")
//!         .with_interval(Duration::from_secs(1))
//!         .with_retention(Duration::from_secs(60));
//!     let mut history = config.new_history().expect("retention is set");
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let mut engine = Engine::new(config);
//!     engine.start_with(move |round| { let _ = tx.send(round); }).await?;
//!
//!     while let Some(round) = rx.recv().await {
//!         history.push(round);
//!         println!("{}", history.summary());
//!     }
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod probe;
pub mod responder;
pub mod stats;
pub mod transport;

pub use config::{AppConfig, ConfigError, EngineConfig, Protocol};
pub use engine::{Engine, EngineState, RoundCallback};
pub use error::EngineError;
pub use history::BoundedHistory;
pub use probe::{ProbeError, ProbeOutcome, ProbeResult, ProbeRound, ProbeState, Prober, RoundResult};
pub use responder::{Responder, ResponderHandle};
pub use stats::WindowStats;
pub use transport::{Connector, EchoHandle, EchoReply, ReplyWaiter};
