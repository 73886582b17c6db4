use std::path::Path;

use anyhow::Context;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

pub const LOG_FILE_PREFIX: &str = "chrio.log";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install a JSON subscriber on stderr, keeping stdout free for command
/// output. Fails if a global subscriber is already in place.
pub fn init_logging() -> anyhow::Result<()> {
    let filter = AppConfig::from_env().log_filter;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .finish();
    install(subscriber)
}

/// Install stdout plus a daily-rolling JSON file sink under `<data dir>/logs`.
///
/// This must be the only subscriber in the process: an earlier
/// [`init_logging`] makes it fail rather than run without the file. The
/// writer guard lives for the rest of the process so buffered lines are
/// flushed on exit.
pub fn init_with_file_sink(config: &AppConfig) -> anyhow::Result<()> {
    let logs_dir = config.logs_dir();
    ensure_dir(&logs_dir)?;

    let appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let stdout_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(writer);

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new(&config.log_filter))
        .with(stdout_layer)
        .with(file_layer);
    install(subscriber)?;
    let _ = FILE_GUARD.set(guard);

    tracing::info!(
        target: "chrio",
        event = "logging_ready",
        logs_dir = %logs_dir.display(),
        git = env!("CHRIO_GIT_HASH")
    );
    Ok(())
}

fn install<S>(subscriber: S) -> anyhow::Result<()>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::set_global_default(subscriber)
        .context("a tracing subscriber is already installed")?;
    // The subscriber is in place; only `log` records are lost here.
    if let Err(err) = tracing_log::LogTracer::init() {
        tracing::warn!(target: "chrio", event = "log_bridge_unavailable", error = %err);
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create log directory {}", dir.display()))
}
