use std::sync::{Arc, Mutex};

use anyhow::Context;

use bazaar_events::InMemoryEventBus;
use bazaar_infra::{
    Ledger, MarketConfig, Stores,
    dispatcher::LedgerEnvelope,
    notifier::TracingNotifier,
    payouts::PayoutBatcher,
    projections::SellerStatsProjection,
    provider::SandboxPaymentProvider,
    services::{CatalogService, OrderService, SettlementService},
    workers::{ProjectionWorker, WorkerHandle},
};

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices {
    pub ledger: Arc<Ledger>,
    pub catalog: CatalogService,
    pub orders: OrderService,
    pub settlement: SettlementService,
    pub batcher: Arc<PayoutBatcher>,
    pub seller_stats: Arc<SellerStatsProjection>,
    /// Sandbox charges and transfers; the only provider wired so far.
    pub provider: Arc<SandboxPaymentProvider>,
    stats_worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    /// In-memory stores (dev/test).
    pub fn in_memory(config: MarketConfig) -> anyhow::Result<Self> {
        Self::with_stores(Stores::in_memory(), config)
    }

    pub fn with_stores(stores: Stores, config: MarketConfig) -> anyhow::Result<Self> {
        let bus: Arc<InMemoryEventBus<LedgerEnvelope>> = Arc::new(InMemoryEventBus::new());
        let provider = Arc::new(SandboxPaymentProvider::new());
        let ledger = Arc::new(Ledger::new(
            stores,
            bus.clone(),
            Arc::new(TracingNotifier),
            provider.clone(),
            config,
        ));

        let seller_stats = Arc::new(SellerStatsProjection::new());
        let sink = seller_stats.clone();
        let stats_worker = ProjectionWorker::spawn("seller-stats", &*bus, move |env: LedgerEnvelope| {
            sink.apply_envelope(&env)
        })
        .context("failed to spawn seller stats worker")?;

        Ok(Self {
            catalog: CatalogService::new(ledger.clone()),
            orders: OrderService::new(ledger.clone()),
            settlement: SettlementService::new(ledger.clone()),
            batcher: Arc::new(PayoutBatcher::new(ledger.clone())),
            ledger,
            seller_stats,
            provider,
            stats_worker: Mutex::new(Some(stats_worker)),
        })
    }

    /// Stop background workers. Safe to call more than once.
    pub fn shutdown(&self) {
        let handle = match self.stats_worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }
}

/// Wire services from the environment.
///
/// `USE_PERSISTENT_STORES=true` selects Postgres (`DATABASE_URL`) when the
/// `postgres` feature is compiled in, and falls back to memory otherwise.
pub async fn build_services() -> anyhow::Result<AppServices> {
    let config = MarketConfig::from_env().context("invalid marketplace configuration")?;

    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        #[cfg(feature = "postgres")]
        {
            let stores = persistent_stores().await?;
            tracing::info!("using postgres record stores");
            return AppServices::with_stores(stores, config);
        }
        #[cfg(not(feature = "postgres"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but postgres feature not enabled, falling back to in-memory"
            );
        }
    }

    AppServices::in_memory(config)
}

#[cfg(feature = "postgres")]
async fn persistent_stores() -> anyhow::Result<Stores> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .context("failed to connect to postgres")?;
    bazaar_infra::store::postgres::migrate(&pool)
        .await
        .context("failed to run record store migration")?;
    Ok(Stores::postgres(pool))
}
