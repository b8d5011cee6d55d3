use std::sync::Arc;

use recurring_jobs::chain::{ContractGateway, JsonRpcGateway};
use recurring_jobs::config::AppConfig;
use recurring_jobs::error::Result;
use recurring_jobs::jobs::ws::job_routes;
use recurring_jobs::jobs::{CancellationController, JobBoard, JobDiscovery, JobTracker, TrackerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export RECUR_RPC_URL=http://localhost:8545");
        eprintln!("  export RECUR_CONTRACT_ADDRESS=0x...");
        std::process::exit(1);
    });

    eprintln!("Recurring Jobs v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Contract: {}", config.contract);
    eprintln!("   Jobs API: http://0.0.0.0:{}/api/jobs", config.http_port);
    eprintln!("   Jobs WS:  ws://0.0.0.0:{}/ws", config.http_port);
    match config.owner {
        Some(owner) => eprintln!("   Owner: {owner}"),
        None => eprintln!("   Owner: none (PUT /api/owner to connect)"),
    }

    // ── Chain ─────────────────────────────────────────────────────────────
    let gateway: Arc<dyn ContractGateway> = Arc::new(JsonRpcGateway::new(&config.rpc)?);

    // ── Jobs ──────────────────────────────────────────────────────────────
    let discovery = Arc::new(JobDiscovery::new(
        Arc::clone(&gateway),
        config.contract,
        config.discovery.clone(),
    ));
    let canceller = Arc::new(CancellationController::new(
        Arc::clone(&gateway),
        config.contract,
    ));
    let tracker = JobTracker::new(
        JobBoard::new(),
        discovery,
        canceller,
        TrackerConfig {
            refresh_after_cancel: config.refresh_after_cancel,
        },
    );

    if let Some(owner) = config.owner {
        tracker.connect(owner).await;
    }

    // ── Server ────────────────────────────────────────────────────────────
    let app = job_routes(tracker);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tracing::info!(port = config.http_port, "Job server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
