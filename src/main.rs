//! Europe PMC Cache CLI
//!
//! Operational tooling for the on-disk cache: inspect statistics and
//! health, invalidate entries, manage harvest checkpoints, and serve
//! metrics for scraping.
//!
//! ```text
//! europmc-cache [--config FILE] [--cache-dir DIR] <COMMAND>
//!
//!   stats                          tier statistics as JSON
//!   health                         one health check as JSON
//!   clear                          drop every entry
//!   evict --tag T                  drop entries tagged T
//!   purge                          drop expired entries
//!   checkpoint show|reset --query Q [--session S]
//!   serve --addr A --interval S    /metrics and /healthz
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use europmc_cache::monitoring::{self, CacheHealthMonitor, PrometheusExporter};
use europmc_cache::pagination::PaginationCheckpoint;
use europmc_cache::{CacheBackend, CacheConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Europe PMC cache - inspect and maintain the harvest cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache configuration file (YAML)
    #[arg(long, env = "EUROPMC_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache directory (overrides the configuration file)
    #[arg(long, env = "EUROPMC_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Run with caching disabled
    #[arg(long, env = "EUROPMC_CACHE_DISABLED")]
    disabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print cache statistics
    Stats,

    /// Run one health check
    Health,

    /// Remove every entry
    Clear,

    /// Remove entries written with a tag
    Evict {
        #[arg(long)]
        tag: String,
    },

    /// Remove expired entries
    Purge,

    /// Inspect or reset a harvest checkpoint
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Serve /metrics and /healthz
    Serve {
        /// Bind address
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
        addr: SocketAddr,

        /// Health poll interval in seconds
        #[arg(long, env = "HEALTH_INTERVAL_SECONDS", default_value = "30")]
        interval: u64,
    },
}

#[derive(Subcommand, Debug)]
enum CheckpointAction {
    /// Print the checkpoint for a query
    Show {
        #[arg(long)]
        query: String,
        #[arg(long)]
        session: Option<String>,
    },

    /// Delete the checkpoint for a query
    Reset {
        #[arg(long)]
        query: String,
        #[arg(long)]
        session: Option<String>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args)?;
    info!("Cache directory: {}", config.cache_dir.display());

    let backend = Arc::new(CacheBackend::open(config));

    let result = run(&args.command, &backend).await;
    backend.close();
    result
}

async fn run(command: &Command, backend: &Arc<CacheBackend>) -> anyhow::Result<()> {
    match command {
        Command::Stats => {
            #[derive(Serialize)]
            struct StatsOutput {
                stats: europmc_cache::cache::CacheStats,
                disk_usage: Option<f64>,
            }
            print_json(&StatsOutput {
                stats: backend.get_stats(),
                disk_usage: backend.l2_disk_usage(),
            })?;
        }

        Command::Health => {
            let monitor = CacheHealthMonitor::new(Arc::clone(backend));
            print_json(&monitor.check_health())?;
        }

        Command::Clear => {
            if !backend.clear() {
                anyhow::bail!("cache clear did not complete; see log for details");
            }
            println!("cleared");
        }

        Command::Evict { tag } => {
            println!("{}", backend.evict(tag));
        }

        Command::Purge => {
            println!("{}", backend.purge_expired());
        }

        Command::Checkpoint { action } => {
            let (query, session) = match action {
                CheckpointAction::Show { query, session }
                | CheckpointAction::Reset { query, session } => (query, session),
            };

            let mut checkpoint = PaginationCheckpoint::new(Arc::clone(backend));
            if let Some(session) = session {
                checkpoint = checkpoint.with_session(session.clone());
            }

            match action {
                CheckpointAction::Show { .. } => match checkpoint.load(query) {
                    Some(state) => {
                        info!(
                            "Checkpoint at {:.1}% (eta {:?})",
                            state.progress_percent(),
                            state.estimated_remaining_time()
                        );
                        print_json(&state)?;
                    }
                    None => println!("no checkpoint for '{}'", query),
                },
                CheckpointAction::Reset { .. } => {
                    let deleted = checkpoint.delete(query);
                    println!("{}", if deleted { "deleted" } else { "not found" });
                }
            }
        }

        Command::Serve { addr, interval } => {
            serve(Arc::clone(backend), *addr, Duration::from_secs(*interval)).await?;
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => CacheConfig::default(),
    };

    if let Some(cache_dir) = &args.cache_dir {
        config.cache_dir = cache_dir.clone();
    }
    if args.disabled {
        config.enabled = false;
    }

    config.validate().context("invalid cache configuration")?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn serve(
    backend: Arc<CacheBackend>,
    addr: SocketAddr,
    interval: Duration,
) -> anyhow::Result<()> {
    let monitor = Arc::new(CacheHealthMonitor::new(backend));
    let exporter = Arc::new(PrometheusExporter::new()?);
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            shutdown.cancel();
        });
    }

    let poller = {
        let monitor = Arc::clone(&monitor);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { monitor.run(interval, shutdown).await })
    };

    let served = monitoring::serve(addr, exporter, monitor, shutdown.clone()).await;
    shutdown.cancel();
    poller.await?;
    served.with_context(|| format!("metrics server on {} failed", addr))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?);

    // Logs go to stderr; stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
