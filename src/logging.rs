//! Tracing subscriber setup

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Parse a configured log level ("info", "WARN", ...)
pub fn parse_level(level: &str) -> Result<Level, EngineError> {
    let level = level.trim();
    if level.is_empty() {
        return Err(EngineError::Config("log_level must not be empty".into()));
    }
    level
        .parse::<Level>()
        .map_err(|_| EngineError::Config(format!("unknown log_level '{}'", level)))
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` still applies on top of the `forum_rank=<level>` default.
pub fn init(level: &str) -> Result<(), EngineError> {
    let level = parse_level(level)?;
    let directive = format!("forum_rank={}", level.as_str().to_ascii_lowercase())
        .parse()
        .map_err(|e| EngineError::Config(format!("invalid log directive: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .map_err(|e| EngineError::Internal(format!("Failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level(" DEBUG ").unwrap(), Level::DEBUG);
        assert!(matches!(parse_level(""), Err(EngineError::Config(_))));
        assert!(matches!(parse_level("loud"), Err(EngineError::Config(_))));
    }
}
