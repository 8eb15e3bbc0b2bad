// ██████╗      ██╗███████╗
// ██╔══██╗     ██║██╔════╝
// ██████╔╝     ██║█████╗
// ██╔═══╝ ██   ██║██╔══╝
// ██║     ╚█████╔╝███████╗
// ╚═╝      ╚════╝ ╚══════╝
//
//  ██████╗ ██████╗ ███╗   ██╗███████╗██╗   ██╗██╗  ████████╗ █████╗
// ██╔════╝██╔═══██╗████╗  ██║██╔════╝██║   ██║██║  ╚══██╔══╝██╔══██╗
// ██║     ██║   ██║██╔██╗ ██║███████╗██║   ██║██║     ██║   ███████║
// ██║     ██║   ██║██║╚██╗██║╚════██║██║   ██║██║     ██║   ██╔══██║
// ╚██████╗╚██████╔╝██║ ╚████║███████║╚██████╔╝███████╗██║   ██║  ██║
//  ╚═════╝ ╚═════╝ ╚═╝  ╚═══╝╚══════╝ ╚═════╝ ╚══════╝╚═╝   ╚═╝  ╚═╝
//
// E N G I N E
//
// The most overkill public-case-lookup proxy ever conceived.
// Rust + Tokio + a whole Chromium on a leash + Aho-Corasick text sieves.
// All to ask a court website one question at a time.

mod browser;
mod cache;
mod config;
mod errors;
mod extract;
mod gate;
mod metrics;
mod models;
mod normalizer;
mod server;
mod session;

use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::browser::ChromiumBrowser;
use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::server::AppState;
use crate::session::LookupEngine;

fn print_banner() {
    let banner = r#"

    ╔══════════════════════════════════════════════════════════════════╗
    ║                                                                  ║
    ║        ██████╗      ██╗███████╗                                  ║
    ║        ██╔══██╗     ██║██╔════╝                                  ║
    ║        ██████╔╝     ██║█████╗                                    ║
    ║        ██╔═══╝ ██   ██║██╔══╝                                    ║
    ║        ██║     ╚█████╔╝███████╗                                  ║
    ║        ╚═╝      ╚════╝ ╚══════╝                                  ║
    ║                                                                  ║
    ║        ⚖️  CONSULTA PÚBLICA ENGINE ⚖️                            ║
    ║                                                                  ║
    ║   Target:   PJe public case lookup (one tribunal at a time)      ║
    ║   Browser:  Headless Chromium via CDP, one per lookup            ║
    ║   Gate:     Single-slot semaphore (the VPS has feelings)         ║
    ║   Cache:    300-second TTL, last write wins                      ║
    ║   Sieve:    Aho-Corasick noise filters on rendered text          ║
    ║                                                                  ║
    ║   "The docket never sleeps. Neither do we. (We do cache.)"       ║
    ║                                                                  ║
    ╚══════════════════════════════════════════════════════════════════╝

    "#;
    println!("{}", banner);
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();

    print_banner();

    info!("⚖️  PJE CONSULTA ENGINE initializing...");

    // Load configuration
    let config = Arc::new(Config::from_env());
    for complaint in config.validate() {
        warn!("Config complaint: {}", complaint);
    }
    if config.slot_capacity > 1 {
        warn!(
            capacity = config.slot_capacity,
            "Slot capacity above 1 — each slot is an entire Chromium; your RAM, your funeral"
        );
    }
    info!(
        base_url = %config.base_url,
        ttl_secs = config.cache_ttl.as_secs(),
        deadline_secs = config.lookup_deadline.as_secs(),
        "✅ Configuration loaded"
    );

    // Metrics collector
    let metrics = Arc::new(MetricsCollector::new());
    info!("✅ Metrics collector initialized");

    // The browser capability — the one piece of this engine that talks to
    // the outside world, and the only piece allowed to.
    let browser = Arc::new(ChromiumBrowser::new(config.browser_tuning()));
    info!("✅ Browser capability ready (launch deferred to first lookup)");

    // The engine: cache + gate + controller, one explicit object.
    let engine = Arc::new(LookupEngine::new(
        Arc::clone(&config),
        browser,
        Arc::clone(&metrics),
    ));
    info!("✅ Lookup engine online — cache empty, slot free");

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ═══════════════════════════════════════════
    // SPAWN HTTP SERVER
    // ═══════════════════════════════════════════
    let state = Arc::new(AppState {
        engine,
        metrics,
    });
    let http_port = config.http_port;
    let mut server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        info!("🌐 HTTP server: ONLINE");
        server::run_http_server(state, http_port, &mut server_shutdown).await;
        info!("🌐 HTTP server: OFFLINE");
    });

    info!("═══════════════════════════════════════════════════════");
    info!("  🟢 ALL SYSTEMS ONLINE - PJE CONSULTA ENGINE ACTIVE");
    info!("  🌐 API at http://0.0.0.0:{}/consulta?doc=...", http_port);
    info!("  ❤️  Health at /health, metrics at /metrics");
    info!("  ⚡ Press Ctrl+C for graceful shutdown");
    info!("═══════════════════════════════════════════════════════");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("🛑 Shutdown signal received!");
            let _ = shutdown_tx.send(true);
        }
        Err(err) => {
            error!("❌ Signal listener error: {}", err);
            let _ = shutdown_tx.send(true);
        }
    }

    info!("⏳ Waiting for tasks to complete (timeout: 10s)...");
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        let _ = tokio::join!(server_handle);
    })
    .await;

    info!("⚖️  PJE CONSULTA ENGINE: OFFLINE");
    Ok(())
}
