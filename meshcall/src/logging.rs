use std::fs::OpenOptions;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, replaces the configured filter entirely. Output goes
/// to `file_path` (appended, no colors) or stdout.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(level).join(","))?,
    };

    let to_file = config.file_path.is_some();
    let writer = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let layer = if config.format == "json" {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_ansi(!to_file)
            .with_file(false)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()?;
    Ok(())
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

/// Filter directives for `level`. The media stack logs every packet-level
/// event at debug, so it stays at warn unless tracing is requested.
fn default_directives(level: Level) -> Vec<String> {
    let mut directives = vec![level.as_str().to_lowercase()];
    if matches!(level, Level::INFO | Level::DEBUG) {
        directives.push("webrtc=warn".to_string());
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("WARNING").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("error").unwrap(), Level::ERROR);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_media_stack_quiet_below_trace() {
        assert_eq!(default_directives(Level::DEBUG), vec!["debug", "webrtc=warn"]);
        assert_eq!(default_directives(Level::TRACE), vec!["trace"]);
        assert_eq!(default_directives(Level::ERROR), vec!["error"]);
    }

    #[test]
    fn test_default_directives_form_a_valid_filter() {
        for level in [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR] {
            assert!(EnvFilter::try_new(default_directives(level).join(",")).is_ok());
        }
    }
}
