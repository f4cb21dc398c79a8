//! Echo probes and probe rounds.
//!
//! - [`Prober`]: one echo exchange, classified as success, loss or error
//! - [`ProbeRound`]: N paced probes joined into one sequence-ordered result

mod prober;
mod round;
mod types;

pub use prober::{DEFAULT_TIMEOUT, Prober};
pub use round::ProbeRound;
pub use types::{ProbeError, ProbeOutcome, ProbeResult, ProbeState, RoundResult};

pub(crate) use types::slot_index;
