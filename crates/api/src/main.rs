use std::sync::Arc;

use anyhow::Context;

use bazaar_api::app::{self, services};
use bazaar_infra::jobs::PayoutScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bazaar_observability::init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let services = Arc::new(services::build_services().await?);
    let interval = services.ledger.config.payout_interval;
    let scheduler = PayoutScheduler::spawn(services.batcher.clone(), interval);

    let app = app::build_app(jwt_secret, services.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    let stats = scheduler.stats();
    scheduler.shutdown().await;
    services.shutdown();
    tracing::info!(
        runs = stats.runs,
        payouts_created = stats.payouts_created,
        payouts_succeeded = stats.payouts_succeeded,
        "stopped"
    );
    Ok(())
}
