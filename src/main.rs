//! SeedStake - settlement & ranking engine for seed predictions
//!
//! Resolved decisions are settled exactly once per prediction, balances
//! and levels updated, an immutable ledger appended, and region
//! leaderboards recomputed through a debounced queue. A background sweep
//! re-runs settlement on a schedule, which is also the recovery path for
//! predictions that failed in an earlier batch.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seedstake_backend::{
    api::{router, ApiState},
    models::Config,
    ranking::{spawn_ranking_worker, RankingQuery, RankingRecalculator},
    settlement::SettlementEngine,
    store::SettlementStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    info!(db = %config.database_path, "🌱 Starting SeedStake settlement engine");

    let store = Arc::new(SettlementStore::new(&config.database_path)?);

    let ranking_trigger = spawn_ranking_worker(
        RankingRecalculator::new(store.clone()),
        Duration::from_millis(config.ranking_debounce_ms),
    );
    let engine = Arc::new(SettlementEngine::new(
        store.clone(),
        Some(ranking_trigger),
    ));
    let query = RankingQuery::new(store.clone());

    spawn_settlement_sweep(
        engine.clone(),
        config.settle_interval_secs,
        config.settle_batch_limit,
    );

    let app = router(ApiState {
        engine,
        query,
        store,
        settle_batch_limit: config.settle_batch_limit,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

/// Periodic settle-all sweep. A re-run only touches still-unresolved
/// predictions, so overlapping with on-demand settlement is safe.
fn spawn_settlement_sweep(engine: Arc<SettlementEngine>, interval_secs: u64, batch_limit: usize) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            match engine.settle_all_resolved_decisions(batch_limit).await {
                Ok(report) if report.processed > 0 => {
                    info!(
                        processed = report.processed,
                        resolved = report.resolved_count,
                        errors = report.error_count,
                        "Scheduled settlement sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Scheduled settlement sweep failed"),
            }
        }
    });
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seedstake_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
