//! Photoscribe daemon: runs the analysis worker pool and lease reaper.
//!
//! The daemon shares the SQLite database with the photoscribe CLI and any
//! other polling consumer: enqueue requests land in the database, workers
//! claim and process them, and pollers read the committed results.
//!
//! ## Usage
//!
//! ```bash
//! photoscribe-daemon           # Run the worker pool in the foreground
//! photoscribe-daemon --once    # Drain eligible jobs once and exit
//! ```

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

use photoscribe::allowlist::ModelAllowlist;
use photoscribe::config::Config;
use photoscribe::db::Store;
use photoscribe::dispatcher::{Dispatcher, WorkerPool};
use photoscribe::llm::ModelRegistry;
use photoscribe::logging;

struct DaemonArgs {
    /// Drain eligible jobs once and exit.
    once: bool,
    config_path: Option<PathBuf>,
}

impl Default for DaemonArgs {
    fn default() -> Self {
        Self {
            once: false,
            config_path: None,
        }
    }
}

fn main() -> Result<()> {
    let args = parse_args();

    logging::init(None)?;

    info!("Photoscribe daemon starting...");

    let config = match args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(workers = config.analysis.worker_count, "Config loaded");

    let store = Arc::new(Store::open(&config.db_path)?);
    info!("Database opened at {:?}", config.db_path);

    let registry = ModelRegistry::from_config(&config);
    if registry.is_empty() {
        tracing::warn!("no provider bindings configured; every job will fail");
    }
    info!(bound_models = registry.len(), "Provider registry ready");
    let registry = Arc::new(registry);

    let allowlist = ModelAllowlist::new(&config.analysis.allowlist);
    if allowlist.is_empty() {
        tracing::warn!("model allowlist is empty; every job will fail");
    }

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        registry,
        allowlist,
        config.analysis.clone(),
    ));

    if args.once {
        info!("Running in single-shot mode");
        let reclaimed = store.reap_expired(&config.analysis)?;
        if reclaimed > 0 {
            info!(reclaimed, "Reclaimed stuck jobs");
        }
        let processed = dispatcher.drain()?;
        info!(processed, "Single-shot pass complete");
    } else {
        let _pool = WorkerPool::start(dispatcher);
        info!(
            "Worker pool running with {} workers",
            config.analysis.worker_count
        );

        // Workers and reaper run until the process is stopped
        loop {
            thread::sleep(Duration::from_secs(60));
            if let Ok(pending) = store.pending_jobs() {
                tracing::debug!(pending, "queue depth");
            }
        }
    }

    info!("Photoscribe daemon stopped");
    Ok(())
}

fn parse_args() -> DaemonArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = DaemonArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                parsed.once = true;
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"photoscribe-daemon - Analysis worker pool for Photoscribe

USAGE:
    photoscribe-daemon [OPTIONS]

OPTIONS:
    --once, -1          Drain eligible jobs once and exit
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    PHOTOSCRIBE_CONFIG  Path to config file (overrides default location)
    PHOTOSCRIBE_LOG     Log level (trace, debug, info, warn, error)

The daemon claims queued analysis jobs from the shared database, dispatches
them to the configured AI providers, and commits normalized results. A
reaper thread requeues jobs whose worker died mid-run.
"#
    );
}
