//! Cohort Server - natural-language audience segmentation over HTTP
//!
//! Boot sequence: parse flags, initialize tracing, build the validated
//! config from the environment (exit 2 on a bad value), load the catalog
//! and indexes (exit 1 when the catalog is unreadable), then serve the API
//! until ctrl-c.

mod cluster;
mod handlers;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cohort_core::{Config, RetrievalService, SessionManager, SessionStore};

use crate::cluster::EvenSplitClusterer;
use crate::state::AppState;

/// Idle-session sweep cadence
const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const DEFAULT_PORT: u16 = 8093;

struct Args {
    host: [u8; 4],
    port: u16,
}

/// Parse command-line arguments. Exits for `--help` / `--version`.
fn parse_args() -> Args {
    let mut args = Args { host: [0, 0, 0, 0], port: DEFAULT_PORT };
    let argv: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < argv.len() {
        match argv[i].as_str() {
            "--help" | "-h" => {
                println!("Cohort Server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Natural-language audience segmentation engine.");
                println!();
                println!("USAGE:");
                println!("    cohort-server [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help         Print help information");
                println!("    -V, --version      Print version information");
                println!("    --port <PORT>      Listen port (default {DEFAULT_PORT})");
                println!();
                println!("ENVIRONMENT:");
                println!("    CATALOG_PATH                 Catalog source (columnar or CSV)");
                println!("    EMBEDDINGS_PATH              Embeddings sidecar file");
                println!("    EMBEDDING_PROVIDER_API_KEY   Enables the semantic path");
                println!("    DISABLE_NLP                  Skip concept/numeric extraction");
                println!("    USE_UNIFIED_SEARCH           Route all traffic to the unified path");
                println!("    UNIFIED_ROLLOUT_PERCENTAGE   Gradual rollout (0-100)");
                println!("    SESSION_TTL_SECONDS          Idle session eviction (default 1800)");
                println!("    RUST_LOG                     Log filter (debug, info, warn, error)");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("cohort-server {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--port" => {
                i += 1;
                match argv.get(i).and_then(|v| v.parse().ok()) {
                    Some(port) => args.port = port,
                    None => {
                        eprintln!("error: --port requires a number");
                        std::process::exit(2);
                    }
                }
            }
            other => {
                eprintln!("error: unrecognized argument '{other}' (see --help)");
                std::process::exit(2);
            }
        }
        i += 1;
    }
    args
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Exit code 2: configuration error
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    // Exit code 1: fatal startup error (catalog unreadable)
    let service = match RetrievalService::from_config(config.clone()).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!(error = %e, "catalog load failed");
            std::process::exit(1);
        }
    };

    let sessions = Arc::new(SessionManager::new(
        SessionStore::new(config.session_ttl),
        Arc::clone(&service),
        Arc::new(EvenSplitClusterer),
    ));

    // Background idle-session sweep
    {
        let sessions = Arc::clone(&sessions);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVICTION_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                sessions.store().evict_idle().await;
            }
        });
    }

    let app = routes::build_router(AppState::new(service, sessions));
    let addr = SocketAddr::from((args.host, args.port));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "could not bind listen address");
            std::process::exit(1);
        }
    };

    info!(%addr, version = env!("CARGO_PKG_VERSION"), "cohort-server listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
