//! # VP-Node Entry Point
//!
//! Bootstrap order:
//!
//! 1. Parse configuration (env, or TOML file via `VP_CONFIG`)
//! 2. Resolve the mandatory validator identity (exit 1 when absent)
//! 3. Open the durable store (LMDB, or in-memory in test mode)
//! 4. Select ledger collaborators (HTTP, or deterministic mocks in
//!    test mode) — constructor-level injection, no branching below here
//! 5. Wire components and subscribe the FATAL watcher
//! 6. Start the HTTP surface (health, metrics, review intake)
//! 7. Spawn the produce loop, queue sweeper and claim requeue worker
//! 8. Run until Ctrl+C or a FATAL transition
//!
//! Environment:
//! - `VALIDATOR_ID` / `VALIDATOR_PUBLIC_KEY` — identity (mandatory,
//!   unless `VP_AUTO_IDENTITY=1`)
//! - `NS_NODE_URL` — ledger service base URL
//! - `VP_HTTP_PORT`, `VP_DATA_DIR`, `ALERT_SINK_API_URL`
//! - `VP_REVIEW_TTL_SECS`, `VP_REVIEW_FEE`, `VP_PRODUCE_INTERVAL_MS`
//! - `VP_CLAIM_REQUEUE_INTERVAL_SECS`, `VP_CLAIM_MAX_ATTEMPTS`,
//!   `VP_CLAIM_INITIAL_BACKOFF_SECS`
//! - `VP_CONSECUTIVE_MISS_THRESHOLD`
//! - `VP_NODE_TEST_MODE` — substitute mock ledger collaborators

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, Level};
use uuid::Uuid;

use vp_common::{ConfigError, NodeConfig};
use vp_node::{
    unix_now, AlertDispatcher, AlertSink, ClaimsStore, ComplianceStore, ComplianceTracker,
    FeeSettlementPipeline, HttpLedgerLookup, HttpLedgerTransport, InMemoryClaimsStore,
    InMemoryComplianceStore, LedgerLookup, LedgerSubmitter, LedgerTransport, LmdbStore,
    MockLedgerLookup, MockLedgerTransport, NodeMetrics, ProduceCycle, ProduceCycleConfig,
    RequeueConfig, RequeueWorker, ReviewQueue, SyncVerifier, ValidatorState,
    ValidatorStateMachine, WebhookAlertSink,
};

/// Seconds between review-queue TTL sweeps.
const SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Clone)]
struct AppState {
    cycle: Arc<ProduceCycle>,
    machine: Arc<ValidatorStateMachine>,
    queue: Arc<ReviewQueue>,
    metrics: Arc<NodeMetrics>,
    validator_id: String,
}

async fn health_handler(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "validatorId": app.validator_id,
        "state": app.machine.state().as_str(),
        "reviewQueueSize": app.queue.size(),
    }))
}

async fn metrics_handler(State(app): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        app.metrics.to_prometheus(),
    )
}

async fn submit_review_handler(
    State(app): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let key = app.cycle.submit_review(body, unix_now());
    (StatusCode::ACCEPTED, Json(json!({ "queued": true, "key": key })))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    // Step 1: configuration
    let config = match std::env::var("VP_CONFIG") {
        Ok(path) => NodeConfig::load_from_file(&path),
        Err(_) => NodeConfig::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    // Step 2: identity is mandatory before any state beyond INITIALIZING
    let validator_id = match config.resolve_validator_id() {
        Ok(id) => id,
        Err(ConfigError::MissingIdentity) if config.auto_identity => {
            format!("val-{}", Uuid::new_v4())
        }
        Err(e) => {
            error!("{e}");
            error!("startup aborted: a validator identity is required");
            std::process::exit(1);
        }
    };

    info!("═══════════════════════════════════════════════════════════════");
    info!("                         VP-Node                                ");
    info!("═══════════════════════════════════════════════════════════════");
    info!("Validator ID:  {}", validator_id);
    info!("Ledger URL:    {}", config.ledger_url);
    info!("HTTP Port:     {}", config.http_port);
    info!("Data Dir:      {}", config.data_dir);
    info!("Test Mode:     {}", config.test_mode);
    info!("═══════════════════════════════════════════════════════════════");

    // Step 3: durable store
    let (claims_store, compliance_store): (Arc<dyn ClaimsStore>, Arc<dyn ComplianceStore>) =
        if config.test_mode {
            info!("test mode: using in-memory stores");
            (
                Arc::new(InMemoryClaimsStore::new()),
                Arc::new(InMemoryComplianceStore::new()),
            )
        } else {
            match LmdbStore::open(Path::new(&config.data_dir)) {
                Ok(store) => {
                    let store = Arc::new(store);
                    (
                        Arc::clone(&store) as Arc<dyn ClaimsStore>,
                        store as Arc<dyn ComplianceStore>,
                    )
                }
                Err(e) => {
                    error!("failed to open durable store at {}: {e}", config.data_dir);
                    std::process::exit(1);
                }
            }
        };

    // Step 4: ledger collaborators (selected once, injected everywhere)
    let (lookup, transport): (Arc<dyn LedgerLookup>, Arc<dyn LedgerTransport>) =
        if config.test_mode {
            info!("test mode: using mock ledger collaborators");
            let lookup = MockLedgerLookup::new();
            lookup.set_tip(0, "0".repeat(64));
            lookup.set_designated_producer(&validator_id);
            (
                Arc::new(lookup),
                Arc::new(MockLedgerTransport::always_succeeding()),
            )
        } else {
            (
                Arc::new(HttpLedgerLookup::new(config.ledger_url.clone())),
                Arc::new(HttpLedgerTransport::new(config.ledger_url.clone())),
            )
        };

    // Step 5: component wiring
    let metrics = Arc::new(NodeMetrics::new());
    let machine = Arc::new(ValidatorStateMachine::new(Arc::clone(&metrics)));
    let queue = Arc::new(ReviewQueue::new(config.review_ttl_secs, Arc::clone(&metrics)));
    let submitter = LedgerSubmitter::new(Arc::clone(&transport));
    let pipeline = Arc::new(FeeSettlementPipeline::new(
        Arc::clone(&claims_store),
        submitter.clone(),
        Arc::clone(&metrics),
    ));
    let compliance = Arc::new(ComplianceTracker::new(compliance_store));
    let alert_sink: Arc<dyn AlertSink> =
        Arc::new(WebhookAlertSink::new(config.alert_sink_url.clone()));
    let alerts = Arc::new(AlertDispatcher::new(alert_sink, validator_id.clone()));
    let sync = SyncVerifier::new(Arc::clone(&lookup), Arc::clone(&metrics));

    let cycle = Arc::new(ProduceCycle::new(
        Arc::clone(&machine),
        Arc::clone(&queue),
        sync,
        lookup,
        submitter,
        Arc::clone(&pipeline),
        compliance,
        Arc::clone(&alerts),
        Arc::clone(&metrics),
        ProduceCycleConfig {
            validator_id: validator_id.clone(),
            review_fee: config.review_fee,
            miss_threshold: config.consecutive_miss_threshold,
            interval_ms: config.produce_interval_ms,
        },
    ));

    let worker = Arc::new(RequeueWorker::new(
        claims_store,
        pipeline,
        alerts,
        RequeueConfig {
            interval_secs: config.requeue_interval_secs,
            max_attempts: config.claim_max_attempts,
            initial_backoff_secs: config.claim_initial_backoff_secs,
        },
    ));

    // FATAL watcher: a terminal transition tears the process down.
    let shutdown = Arc::new(Notify::new());
    let fatal_shutdown = Arc::clone(&shutdown);
    let _fatal_watch = machine.subscribe(move |_, next| {
        if next.is_terminal() {
            error!("entered FATAL state; shutting down");
            fatal_shutdown.notify_waiters();
        }
    });

    // Step 6: HTTP surface
    let app_state = AppState {
        cycle: Arc::clone(&cycle),
        machine: Arc::clone(&machine),
        queue: Arc::clone(&queue),
        metrics: Arc::clone(&metrics),
        validator_id: validator_id.clone(),
    };
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/reviews", post(submit_review_handler))
        .with_state(app_state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind HTTP surface to {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("HTTP surface listening on http://{addr}");

    let http_shutdown = Arc::clone(&shutdown);
    let http_handle = tokio::spawn(async move {
        let graceful = async move { http_shutdown.notified().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
        {
            error!("HTTP surface error: {e}");
        }
    });

    // Step 7: background loops
    let produce_handle = Arc::clone(&cycle).spawn(Arc::clone(&shutdown));
    let worker_handle = Arc::clone(&worker).spawn(Arc::clone(&shutdown));

    let sweep_queue = Arc::clone(&queue);
    let sweep_shutdown = Arc::clone(&shutdown);
    let sweep_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)) => {
                    sweep_queue.sweep_expired(unix_now());
                }
                _ = sweep_shutdown.notified() => break,
            }
        }
    });

    // Step 8: run until Ctrl+C or FATAL
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("shutdown requested"),
                Err(e) => error!("failed to listen for Ctrl+C: {e}"),
            }
        }
        _ = shutdown.notified() => {}
    }

    shutdown.notify_waiters();
    let _ = tokio::join!(http_handle, produce_handle, worker_handle, sweep_handle);

    if machine.state() == ValidatorState::Fatal {
        std::process::exit(1);
    }
    info!("VP-Node stopped");
}
