//! Edge router (v1)
//!
//! Sits in front of the identity, writer, static and verifier services and
//! dispatches each request to exactly one of them.
//!
//! # Architecture Overview
//!
//! ```text
//!  Client ──▶ heartbeat ─▶ shed ─▶ access log ─▶ body limit ─▶ metrics
//!                                                                 │
//!         ┌───────────────────────────────────────────────────────┘
//!         ▼
//!     transport security ─▶ legacy headers ─▶ verifier ─▶ fake verification
//!                                                                 │
//!         ┌───────────────────────────────────────────────────────┘
//!         ▼
//!     API read/write ─▶ upstream metrics ─▶ catch-all (static)
//! ```
//!
//! Exit codes follow BSD sysexits: `CONFIG` for bad configuration,
//! `UNAVAILABLE` when the listener can't bind, `SOFTWARE` if serving fails.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;

use edge_router::config::RouterConfig;
use edge_router::lifecycle::{signals, Shutdown};
use edge_router::observability::{logging, metrics};
use edge_router::HttpServer;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    tracing::info!("edge-router v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match RouterConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return exit(exitcode::CONFIG);
        }
    };

    tracing::info!(
        bind_address = %config.listener.bind_address(),
        identity = %config.backends.identity,
        writer = %config.backends.writer,
        static_assets = %config.backends.static_assets,
        verifier = ?config.backends.verifier.as_ref().map(|o| o.to_string()),
        "Configuration loaded"
    );
    if let Ok(dump) = serde_json::to_string(config.as_ref()) {
        tracing::debug!(config = %dump, "Effective configuration");
    }

    if let Some(address) = config.observability.metrics_address.as_deref() {
        match address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter, continuing without metrics");
                }
            }
            Err(e) => {
                tracing::error!(metrics_address = %address, error = %e, "Failed to parse metrics address");
                return exit(exitcode::CONFIG);
            }
        }
    }

    let listener = match TcpListener::bind(config.listener.bind_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %config.listener.bind_address(), error = %e, "Failed to bind listener");
            return exit(exitcode::UNAVAILABLE);
        }
    };

    let shutdown = Arc::new(Shutdown::new());
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match signals::termination().await {
            Ok(()) => {
                trigger.begin_drain();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
        }
    });

    let server = HttpServer::new(config, shutdown);
    if let Err(e) = server.run(listener).await {
        tracing::error!(error = %e, "Server failed");
        return exit(exitcode::SOFTWARE);
    }

    tracing::info!("Shutdown complete");
    exit(exitcode::OK)
}

fn exit(code: exitcode::ExitCode) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
