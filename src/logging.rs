/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::ServiceConfig;
use crate::error::{HaloError, Result};

/// Initialize structured logging based on configuration
pub fn init_logging(config: &ServiceConfig) -> Result<()> {
    let level = config.log_level.to_tracing_level();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("halo={}", level)))
        .map_err(|e| HaloError::Config(format!("Failed to create log filter: {}", e)))?;

    if let Some(ref log_path) = config.log_file {
        init_file_logging(log_path, env_filter, config.log_json)?;
    } else {
        init_stdout_logging(env_filter, config.log_json);
    }

    Ok(())
}

fn init_stdout_logging(env_filter: EnvFilter, json: bool) {
    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::NONE);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_span_events(FmtSpan::NONE)
            .compact();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }
}

fn init_file_logging(log_path: &Path, env_filter: EnvFilter, json: bool) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| HaloError::Config(format!("Failed to create log file: {}", e)))?;

    if json {
        let fmt_layer = fmt::layer().json().with_writer(file).with_ansi(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(file)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    Ok(())
}
