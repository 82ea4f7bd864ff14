//! servekit
//!
//! Runs the standard application: named HTTP clients, the status module, and
//! HTTP / RPC / cron subsystems, or a single module command.
//!
//! # Lifecycle
//!
//! ```text
//!   load config ──▶ build ──▶ provision ──▶ dispatch ──▶ run ──▶ drain ──▶ stop
//!        ▲                                                │
//!        └──────── config file changed / SIGHUP ◀─────────┘
//! ```
//!
//! SIGINT and SIGTERM stop the process; a reload stops the current pass and
//! starts a fresh one with the newly loaded configuration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use servekit::app::{self, Mode};
use servekit::config::{load_or_default, AppConfig, FileWatcher};
use servekit::lifecycle::signals;
use servekit::observability::{logging, metrics};
use servekit::BoxError;

#[derive(Parser)]
#[command(name = "servekit", version)]
#[command(about = "Service container with named resources and capability-based modules", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve until terminated (default)
    Serve,
    /// Run a module command, e.g. `run status`
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
    /// Print the default configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    if let Some(Commands::Config) = cli.command {
        print!("{}", AppConfig::default_toml()?);
        return Ok(());
    }

    let config = load_or_default(cli.config.as_deref())?;
    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), env = %config.app.env, "servekit starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    match cli.command {
        Some(Commands::Run { args }) => {
            app::build(&config, Mode::Command(args))
                .build()?
                .run(CancellationToken::new())
                .await?;
        }
        _ => serve(cli.config, config).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Serve, starting a fresh pass every time a reload is requested.
async fn serve(path: Option<PathBuf>, mut config: AppConfig) -> Result<(), BoxError> {
    loop {
        let orchestrator = app::build(&config, Mode::Serve).build()?;
        let shutdown = CancellationToken::new();
        let reload = Arc::new(AtomicBool::new(false));
        let triggers = CancellationToken::new();

        if let (true, Some(path)) = (config.watch.enabled, path.as_ref()) {
            let watcher = FileWatcher::new(path).poll_interval(Duration::from_millis(config.watch.poll_interval_ms));
            let (shutdown, reload, stop) = (shutdown.clone(), reload.clone(), triggers.clone());
            tokio::spawn(async move {
                watcher
                    .watch(stop, move || {
                        reload.store(true, Ordering::SeqCst);
                        shutdown.cancel();
                        Ok(())
                    })
                    .await
            });
        }

        {
            let (shutdown, reload, stop) = (shutdown.clone(), reload.clone(), triggers.clone());
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = signals::reload_requested() => {
                        reload.store(true, Ordering::SeqCst);
                        shutdown.cancel();
                    }
                }
            });
        }

        let result = orchestrator.run(shutdown).await;
        triggers.cancel();
        result?;

        if !reload.load(Ordering::SeqCst) {
            return Ok(());
        }

        match load_or_default(path.as_deref()) {
            Ok(new_config) => {
                tracing::info!("Configuration reloaded");
                config = new_config;
            }
            Err(e) => {
                tracing::error!("Failed to reload config: {}. Keeping current configuration.", e);
            }
        }
    }
}
