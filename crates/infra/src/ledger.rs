//! Wiring shared by every service: stores, dispatcher, collaborators, config.

use std::sync::Arc;

use bazaar_catalog::{Listing, Subscription};
use bazaar_orders::Order;
use bazaar_payments::{Commission, Payment};
use bazaar_payouts::Payout;

use crate::config::MarketConfig;
use crate::dispatcher::{EnvelopeSink, RecordDispatcher};
use crate::notifier::Notifier;
use crate::provider::PaymentProvider;
use crate::store::{InMemoryRecordStore, RecordStore};

/// One store per record collection.
#[derive(Clone)]
pub struct Stores {
    pub listings: Arc<dyn RecordStore<Listing>>,
    pub subscriptions: Arc<dyn RecordStore<Subscription>>,
    pub orders: Arc<dyn RecordStore<Order>>,
    pub payments: Arc<dyn RecordStore<Payment>>,
    pub commissions: Arc<dyn RecordStore<Commission>>,
    pub payouts: Arc<dyn RecordStore<Payout>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            listings: Arc::new(InMemoryRecordStore::new()),
            subscriptions: Arc::new(InMemoryRecordStore::new()),
            orders: Arc::new(InMemoryRecordStore::new()),
            payments: Arc::new(InMemoryRecordStore::new()),
            commissions: Arc::new(InMemoryRecordStore::new()),
            payouts: Arc::new(InMemoryRecordStore::new()),
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::store::PostgresRecordStore;

        Self {
            listings: Arc::new(PostgresRecordStore::new(pool.clone())),
            subscriptions: Arc::new(PostgresRecordStore::new(pool.clone())),
            orders: Arc::new(PostgresRecordStore::new(pool.clone())),
            payments: Arc::new(PostgresRecordStore::new(pool.clone())),
            commissions: Arc::new(PostgresRecordStore::new(pool.clone())),
            payouts: Arc::new(PostgresRecordStore::new(pool)),
        }
    }
}

pub struct Ledger {
    pub stores: Stores,
    pub dispatcher: RecordDispatcher,
    pub notifier: Arc<dyn Notifier>,
    pub provider: Arc<dyn PaymentProvider>,
    pub config: MarketConfig,
}

impl Ledger {
    pub fn new(
        stores: Stores,
        sink: Arc<dyn EnvelopeSink>,
        notifier: Arc<dyn Notifier>,
        provider: Arc<dyn PaymentProvider>,
        config: MarketConfig,
    ) -> Self {
        Self {
            stores,
            dispatcher: RecordDispatcher::new(sink),
            notifier,
            provider,
            config,
        }
    }
}
