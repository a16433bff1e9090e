//! # logscan-cli
//!
//! Command-line front end for the logscan engine.
//!
//! Provides commands for:
//! - Forward streaming with optional follow (`stream-forward`)
//! - Backward streaming (`stream-backward`)
//! - Raw pattern search (`search`)
//!
//! Records go to stdout as newline-delimited JSON (or text); logs go to
//! stderr and are controlled with `RUST_LOG`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format};
pub use error::CliError;
pub use output::OutputFormat;

use logscan::EngineConfig;

/// Builds the engine configuration from an optional file plus flag and
/// environment overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the result is invalid.
pub fn load_config(cli: &Cli) -> Result<EngineConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(interval) = cli.poll_interval_ms {
        config.poll_interval_ms = interval;
    }
    if let Some(backend) = cli.watch_backend {
        config.watch_backend = backend.into();
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use logscan::WatchBackend;

    #[test]
    fn flags_override_config_file() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        std::fs::write(file.path(), r#"{"chunk_size": 1024, "batch_size": 7}"#).expect("write");
        let config_path = file.path().to_string_lossy().into_owned();

        let cli = Cli::try_parse_from([
            "logscan",
            "--config",
            config_path.as_str(),
            "--chunk-size",
            "2048",
            "--watch-backend",
            "poll",
            "search",
            "/a.log",
            "x",
        ])
        .expect("parse");

        let config = load_config(&cli).expect("config");
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.watch_backend, WatchBackend::Poll);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let cli = Cli::try_parse_from(["logscan", "--chunk-size", "0", "search", "/a.log", "x"])
            .expect("parse");
        assert!(matches!(load_config(&cli), Err(CliError::Config(_))));
    }
}
