//! Entry point for the v1 compatibility front-end: loads configuration,
//! wires up an allocator façade, and runs the acceptor until interrupted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use spalloc_acceptor::Acceptor;
use spalloc_config::CompatConfig;
use spalloc_facade::memory::{MachineSeed, MemoryFacade};
use spalloc_facade::AllocatorFacade;

#[derive(Parser, Debug)]
#[command(name = "spalloc-compat", version, about = "Backwards-compatible spalloc v1 network front-end")]
struct Args {
    /// Path to a JSON5 configuration file holding a `compat` section.
    #[arg(long, env = "SPALLOC_CONFIG")]
    config: Option<PathBuf>,
}

/// Seed a demo allocator since the real SQL-backed one is an external
/// collaborator (spec §1) this crate doesn't implement.
fn demo_facade() -> Arc<dyn AllocatorFacade> {
    Arc::new(MemoryFacade::new(vec![MachineSeed {
        name: "demo".to_string(),
        tags: HashSet::from(["default".to_string()]),
        width: 4,
        height: 4,
    }]))
}

fn load_config(path: Option<PathBuf>) -> CompatConfig {
    let Some(path) = path else {
        return CompatConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => match CompatConfig::from_json5(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to parse config, using defaults");
                CompatConfig::default()
            }
        },
        Err(err) => {
            error!(path = %path.display(), error = %err, "failed to read config, using defaults");
            CompatConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(args.config);

    if !config.enable {
        info!("compat.enable is false, exiting");
        return;
    }

    let facade = demo_facade();
    let acceptor = match Acceptor::bind(&config, facade).await {
        Ok(acceptor) => acceptor,
        Err(err) => {
            error!(error = %err, "failed to start compat server");
            std::process::exit(1);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "compat server started");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining sessions");
    acceptor.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
