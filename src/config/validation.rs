//! Config errors, and the text helpers applied before values are parsed.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Why a pathwatch configuration could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pathwatch config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A field holds a value the engine cannot run with.
    #[error("rejected pathwatch config: {0}")]
    ValidationError(String),
}

/// Parse an interval, spacing, timeout or retention flag.
///
/// Accepts humantime spans. A bare number has no unit and is refused.
///
/// ```
/// use std::time::Duration;
///
/// use pathwatch::config::parse_duration;
///
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert!(parse_duration("3").is_err());
/// ```
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    match value.trim() {
        "" => Err("expected a duration such as 5s or 100ms".to_string()),
        span => humantime::parse_duration(span).map_err(|e| format!("{span:?}: {e}")),
    }
}

/// Substitute `${NAME}` and `${NAME:-fallback}` in config text.
///
/// A reference to an unset variable with no fallback becomes empty text.
pub fn expand_env_vars(input: &str) -> String {
    env_reference()
        .replace_all(input, |caps: &Captures| match std::env::var(&caps[1]) {
            Ok(value) => value,
            Err(_) => caps.get(2).map_or_else(String::new, |m| m.as_str().to_string()),
        })
        .into_owned()
}

fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env reference pattern compiles")
    })
}
