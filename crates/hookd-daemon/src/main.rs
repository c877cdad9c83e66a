//! hookd daemon entry point.

use anyhow::Context;
use clap::Parser;
use hookd_core::Environment;
use hookd_daemon::{Args, Settings};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "hookd=info,hookd_core=info,hookd_hub=warn,hookd_daemon=info";

/// Log to stderr. Debug builds also write a timestamped file in the temp dir.
fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if cfg!(debug_assertions) {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);

        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("hookd-daemon-{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Writer must outlive the process
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer.with_line_number(true))
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", temp_dir.join(&log_filename).display());
    } else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging();
    info!("Starting hookd daemon v{}", env!("CARGO_PKG_VERSION"));

    let env = Environment::from_process();
    let settings = Settings::resolve(&args, &env).context("Invalid configuration")?;
    info!("Handler paths: {}", settings.handler_paths.join(", "));

    let outcome = hookd_daemon::run(settings, env)
        .await
        .context("Event handler server failed")?;

    info!("hookd daemon stopped ({:?})", outcome);
    Ok(())
}
