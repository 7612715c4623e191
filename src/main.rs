// ============================================================================
// DRAFTBOOK - DRAFT TOURNAMENTS + WALLET LEDGER
// ============================================================================
//
// Storage: ReDB (ACID) with a DashMap account cache
// Server:  Axum, identity from the x-account-id header
// Timers:  evaluated lazily on every read; a background sweep catches up
//          drafts nobody is looking at and polls the match oracle
//
// Run:  cargo run
// Test: curl http://localhost:8080/health

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use draftbook::access::AccessControl;
use draftbook::approvals::Approvals;
use draftbook::clock::{Clock, SharedClock, SystemClock};
use draftbook::config::Config;
use draftbook::draft::verification::RetryPolicy;
use draftbook::draft::DraftEngine;
use draftbook::events::{DomainEvent, EventBus};
use draftbook::ledger::LedgerStore;
use draftbook::oracle::HttpMatchOracle;
use draftbook::routes::{build_router, AppState};
use draftbook::settlement::Settlement;
use draftbook::storage::Store;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("🛑 Shutdown signal received");
}

/// Log every published event. Stands in for push delivery.
async fn log_events(events: EventBus) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(DomainEvent::Notify { account_id, notification }) => {
                info!(account = %account_id, notification = ?notification, "🔔 Notify");
            }
            Ok(event) => debug!(event = ?event, "Event"),
            Err(RecvError::Lagged(missed)) => warn!(missed, "Event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() {
    // 1. Logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,draftbook=debug")))
        .with(tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true))
        .init();

    info!("╔══════════════════════════════════════════════════════╗");
    info!("║       DRAFTBOOK - DRAFT TOURNAMENTS + LEDGER         ║");
    info!("╠══════════════════════════════════════════════════════╣");
    info!("║  Version:   {:<41}║", env!("CARGO_PKG_VERSION"));
    info!("║  Modes:     team-swiss-A/B, duel-pool, duel-ban      ║");
    info!("╚══════════════════════════════════════════════════════╝");

    // 2. Config
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => { error!("❌ FATAL: {}", e); panic!("Config invalid: {}", e); }
    };
    if config.admins.is_empty() {
        warn!("⚠️  DRAFTBOOK_ADMINS is empty; admin endpoints will refuse everyone");
    }

    // 3. Storage (ReDB)
    let store = {
        info!("🗄️  Opening ReDB at {}", config.data_dir.display());
        match Store::open(&config.data_dir) {
            Ok(store) => { info!("✅ Store ready"); store }
            Err(e) => { error!("❌ FATAL: {}", e); panic!("Storage init failed: {:?}", e); }
        }
    };

    // 4. Core services
    let events = EventBus::new();
    let ledger = LedgerStore::new(store.clone(), events.clone());
    let access = AccessControl::load(store, &config.admins).expect("Failed to load roles");
    let clock: SharedClock = Arc::new(SystemClock);

    match ledger.reconcile_all() {
        Ok(report) if report.mismatches.is_empty() => {
            info!("⚖️  Ledger reconciled ({} accounts)", report.checked);
        }
        Ok(report) => {
            error!("🚨 {} account(s) out of balance at startup", report.mismatches.len());
        }
        Err(e) => error!("❌ Reconciliation failed: {}", e),
    }

    let settlement = Settlement::new(ledger.clone(), config.settlement.clone());
    let mut engine = DraftEngine::new(
        settlement,
        access.clone(),
        clock.clone(),
        RetryPolicy::from(&config.oracle),
        config.default_turn_seconds,
    );
    match &config.oracle.url {
        Some(url) => {
            let oracle = HttpMatchOracle::new(url.clone()).expect("Failed to build oracle client");
            engine = engine.with_oracle(Arc::new(oracle));
            info!("🔮 Match oracle at {}", url);
        }
        None => warn!("⚠️  No DRAFTBOOK_ORACLE_URL; battles need admin resolution"),
    }
    let drafts = Arc::new(engine);
    let approvals = Approvals::new(ledger.clone(), access.clone(), clock.clone());

    tokio::spawn(log_events(events));

    // 5. Background sweep
    let sweeper = drafts.clone();
    let sweep_seconds = config.sweep_seconds;
    tokio::spawn(async move {
        info!("⏱️  Draft sweep every {}s", sweep_seconds);
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(sweep_seconds));
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.sweep().await {
                error!("❌ Draft sweep failed: {}", e);
            }
        }
    });

    // 6. HTTP Server
    let state = AppState {
        ledger,
        drafts,
        approvals,
        access,
        started_at: clock.now(),
    };
    let app = build_router(state);
    let addr = config.bind_addr;

    info!("");
    info!("🚀 Listening on http://{}", addr);
    info!("");
    info!("📡 ENDPOINTS:");
    info!("   GET  /health                          Health check");
    info!("   GET  /accounts/{{id}}/balance           Balance");
    info!("   GET  /accounts/{{id}}/entries           Ledger history (paged)");
    info!("   POST /withdrawals                     Request withdrawal");
    info!("   POST /deposits                        Report deposit");
    info!("");
    info!("🎲 DRAFTS:");
    info!("   POST /drafts                          Create");
    info!("   GET  /drafts/{{id}}                     State (?since_version=)");
    info!("   POST /drafts/{{id}}/join|leave|spectate Seats");
    info!("   POST /drafts/{{id}}/start               Manual start");
    info!("   POST /drafts/{{id}}/coin-flip           Lock coin choice");
    info!("   POST /drafts/{{id}}/picks               Pick or ban");
    info!("   POST /drafts/{{id}}/battles             Submit battle code");
    info!("   POST /drafts/{{id}}/verify              Poll oracle");
    info!("   POST /drafts/{{id}}/cancel              Cancel + refund");
    info!("");
    info!("🛡️  ADMIN:");
    info!("   GET  /admin/withdrawals|deposits      Approval queues");
    info!("   POST /admin/withdrawals/{{id}}/approve|reject");
    info!("   POST /admin/deposits/{{id}}/credit|dismiss");
    info!("   POST /admin/drafts/{{id}}/battles/{{index}}/resolve");
    info!("   POST /admin/drafts/{{id}}/settle");
    info!("   POST /admin/roles                     Grant/revoke admin");
    info!("   GET  /admin/reconcile/{{id}}            Balance audit");
    info!("");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    info!("✅ Server shutdown complete");
}
