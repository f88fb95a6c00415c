use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use bazaar_catalog::{Listing, Subscription};
use bazaar_core::{AggregateId, AggregateRoot, ExpectedVersion};
use bazaar_orders::Order;
use bazaar_payments::{Commission, Payment};
use bazaar_payouts::Payout;

/// A ledger aggregate persisted as a whole document.
pub trait Record:
    AggregateRoot + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Collection name; doubles as the envelope `aggregate_type`.
    const COLLECTION: &'static str;

    fn record_id(&self) -> AggregateId;

    /// Keys that must be unique within the collection.
    ///
    /// Claimed on create and on every update; a claimed key stays with its
    /// record, so a key may appear later in a record's life but never moves.
    fn unique_keys(&self) -> Vec<String> {
        Vec::new()
    }
}

impl Record for Listing {
    const COLLECTION: &'static str = "catalog.listing";

    fn record_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

impl Record for Subscription {
    const COLLECTION: &'static str = "catalog.subscription";

    fn record_id(&self) -> AggregateId {
        self.id_typed().0
    }

    /// One subscription per user.
    fn unique_keys(&self) -> Vec<String> {
        self.user_id()
            .map(|user| vec![subscription_key(user)])
            .unwrap_or_default()
    }
}

pub fn subscription_key(user: bazaar_core::UserId) -> String {
    format!("user:{user}")
}

impl Record for Order {
    const COLLECTION: &'static str = "orders.order";

    fn record_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

impl Record for Payment {
    const COLLECTION: &'static str = "payments.payment";

    fn record_id(&self) -> AggregateId {
        self.id_typed().0
    }

    /// The transaction id, and once completed the provider's charge reference:
    /// one charge settles at most one payment.
    fn unique_keys(&self) -> Vec<String> {
        let mut keys = vec![payment_key(self.transaction_id())];
        keys.extend(self.provider_reference().map(provider_reference_key));
        keys
    }
}

pub fn payment_key(transaction_id: &str) -> String {
    format!("txn:{transaction_id}")
}

pub fn provider_reference_key(reference: &str) -> String {
    format!("ref:{reference}")
}

impl Record for Commission {
    const COLLECTION: &'static str = "payments.commission";

    fn record_id(&self) -> AggregateId {
        self.id_typed().0
    }

    fn unique_keys(&self) -> Vec<String> {
        self.unique_key().into_iter().collect()
    }
}

impl Record for Payout {
    const COLLECTION: &'static str = "payouts.payout";

    fn record_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Id or unique key already taken.
    #[error("duplicate {collection} record: {key}")]
    Duplicate { collection: &'static str, key: String },

    #[error("{collection} record {id} not found")]
    NotFound { collection: &'static str, id: AggregateId },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Predicate used by [`RecordStore::find`].
pub type RecordFilter<'a, R> = &'a (dyn Fn(&R) -> bool + Send + Sync);

/// Document persistence for one record type.
///
/// There are no multi-record transactions; consistency across records comes
/// from `conditional_update` and unique keys.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    async fn find(&self, filter: RecordFilter<'_, R>) -> Result<Vec<R>, StoreError>;

    async fn find_by_id(&self, id: AggregateId) -> Result<Option<R>, StoreError>;

    async fn find_by_unique_key(&self, key: &str) -> Result<Option<R>, StoreError>;

    /// Insert a new record. Fails with `Duplicate` on a taken id or unique key.
    async fn create(&self, record: R) -> Result<R, StoreError>;

    /// Unconditional replace of an existing record.
    ///
    /// Fails with `Duplicate`, writing nothing, when the record carries a
    /// unique key another record already holds.
    async fn update(&self, record: R) -> Result<R, StoreError>;

    /// Replace the record only if its stored version matches `expected`.
    ///
    /// Returns `None` when the version check fails. Unique keys are checked
    /// as in `update`.
    async fn conditional_update(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        record: R,
    ) -> Result<Option<R>, StoreError>;
}

#[async_trait]
impl<R, S> RecordStore<R> for Arc<S>
where
    R: Record,
    S: RecordStore<R> + ?Sized,
{
    async fn find(&self, filter: RecordFilter<'_, R>) -> Result<Vec<R>, StoreError> {
        (**self).find(filter).await
    }

    async fn find_by_id(&self, id: AggregateId) -> Result<Option<R>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_by_unique_key(&self, key: &str) -> Result<Option<R>, StoreError> {
        (**self).find_by_unique_key(key).await
    }

    async fn create(&self, record: R) -> Result<R, StoreError> {
        (**self).create(record).await
    }

    async fn update(&self, record: R) -> Result<R, StoreError> {
        (**self).update(record).await
    }

    async fn conditional_update(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        record: R,
    ) -> Result<Option<R>, StoreError> {
        (**self).conditional_update(id, expected, record).await
    }
}
