//! Centralized file-based logging system
//!
//! Writes logs to files in logs/ directory, separated by log type:
//! - logs/main - everything, JSON
//! - logs/error - warnings and errors only
//! - logs/session - FIX session and transport
//! - logs/market_data - subscriptions, assembly, ladder anomalies
//! - logs/refdata - security definitions and directory browsing
//! - logs/api - control surface
//!
//! The filter comes from `RUST_LOG`, defaulting to `info`. Wire traffic is
//! logged at `debug`.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::{filter_fn, LevelFilter},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TYPES: [&str; 6] = ["main", "error", "session", "market_data", "refdata", "api"];

/// Initialize centralized file logging
///
/// Returns the appender guards; they must outlive every log call.
pub fn init_logging() -> io::Result<Vec<WorkerGuard>> {
    init_logging_in(Path::new("logs"))
}

/// Same as [`init_logging`] with an explicit root directory
pub fn init_logging_in(logs_dir: &Path) -> io::Result<Vec<WorkerGuard>> {
    for log_type in LOG_TYPES {
        fs::create_dir_all(logs_dir.join(log_type))?;
    }

    let mut guards = Vec::new();
    let mut appender = |name: &str| {
        let (writer, guard) = create_appender(&logs_dir.join(name), name);
        guards.push(guard);
        writer
    };
    let main_appender = appender("main");
    let error_appender = appender("error");
    let session_appender = appender("session");
    let md_appender = appender("market_data");
    let refdata_appender = appender("refdata");
    let api_appender = appender("api");

    // Main log - all logs
    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(LevelFilter::WARN);

    // Targets are module paths unless a log_* macro sets one explicitly
    let session_layer = tracing_subscriber::fmt::layer()
        .with_writer(session_appender)
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter_fn(|metadata| {
            metadata.target().contains("session") || metadata.target().contains("transport")
        }));

    let md_layer = tracing_subscriber::fmt::layer()
        .with_writer(md_appender)
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter_fn(|metadata| metadata.target().contains("market_data")));

    let refdata_layer = tracing_subscriber::fmt::layer()
        .with_writer(refdata_appender)
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter_fn(|metadata| metadata.target().contains("refdata")));

    let api_layer = tracing_subscriber::fmt::layer()
        .with_writer(api_appender)
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter_fn(|metadata| {
            metadata.target().contains("api") || metadata.target().contains("tower_http")
        }));

    // Console layer for development
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(main_layer)
        .with(error_layer)
        .with(session_layer)
        .with(md_layer)
        .with(refdata_layer)
        .with(api_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    tracing::info!(dir = %logs_dir.display(), "logging initialized");

    Ok(guards)
}

/// Create a daily rolling file appender
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);
    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_session {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "session", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_md {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "market_data", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_refdata {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "refdata", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_api {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "api", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_main {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "main", $level, $($arg)+)
    };
}
