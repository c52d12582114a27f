//! Logging initialization.
//!
//! Always logs structured lines to stderr; when `logging.to_file` is set,
//! additionally writes a non-blocking rolling file under
//! `logging.directory`, following the teacher's `tracing_appender` setup.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Handle that must be kept alive for the duration of the program so
/// buffered file logs are flushed on drop.
pub struct LoggingHandle {
    pub _guard: Option<WorkerGuard>,
}

pub fn init_logging(config: &Config, debug_override: bool) -> Result<LoggingHandle> {
    let log_level = if debug_override {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };

    let filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or(log_level));

    if config.logging.to_file {
        std::fs::create_dir_all(&config.logging.directory)?;
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let log_filename = format!("renovate-agent-{timestamp}.log");
        let file_appender =
            tracing_appender::rolling::never(&config.logging.directory, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .init();

        Ok(LoggingHandle {
            _guard: Some(guard),
        })
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();

        Ok(LoggingHandle { _guard: None })
    }
}
