//! Configuration for pathwatch.
//!
//! - [`EngineConfig`]: what to probe and how often
//! - [`AppConfig`]: YAML file loaded by the binary

mod app;
mod engine;
mod validation;

pub use app::{AppConfig, OutputConfig};
pub use engine::{
    DEFAULT_INTERVAL, DEFAULT_SAMPLES, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_SPACING, DEFAULT_UDP_PORT,
    EngineConfig, MAX_HISTORY_CAPACITY, Protocol,
};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
