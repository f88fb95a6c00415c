use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::RwLock;

use async_trait::async_trait;

use bazaar_core::{AggregateId, AggregateRoot, ExpectedVersion};

use super::record::{Record, RecordFilter, RecordStore, StoreError};

#[derive(Debug)]
struct Inner<R> {
    records: HashMap<AggregateId, R>,
    keys: HashMap<String, AggregateId>,
}

/// In-memory record store for tests/dev.
///
/// The version check and the write of `conditional_update` happen under one
/// write lock, so it behaves as an atomic compare-and-swap.
#[derive(Debug)]
pub struct InMemoryRecordStore<R> {
    inner: RwLock<Inner<R>>,
    _record: PhantomData<fn() -> R>,
}

impl<R> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                keys: HashMap::new(),
            }),
            _record: PhantomData,
        }
    }
}

impl<R> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl<R: Record> Inner<R> {
    /// First key of `record` already held by a different record.
    fn taken_key(&self, id: AggregateId, record: &R) -> Option<String> {
        record
            .unique_keys()
            .into_iter()
            .find(|k| self.keys.get(k).is_some_and(|owner| *owner != id))
    }

    fn claim_keys(&mut self, id: AggregateId, record: &R) {
        for key in record.unique_keys() {
            self.keys.entry(key).or_insert(id);
        }
    }

    fn replace(&mut self, id: AggregateId, record: R) -> Result<R, StoreError> {
        if let Some(key) = self.taken_key(id, &record) {
            return Err(StoreError::Duplicate {
                collection: R::COLLECTION,
                key,
            });
        }
        self.claim_keys(id, &record);
        self.records.insert(id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for InMemoryRecordStore<R> {
    async fn find(&self, filter: RecordFilter<'_, R>) -> Result<Vec<R>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .records
            .values()
            .filter(|r| filter(r))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: AggregateId) -> Result<Option<R>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.records.get(&id).cloned())
    }

    async fn find_by_unique_key(&self, key: &str) -> Result<Option<R>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .keys
            .get(key)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn create(&self, record: R) -> Result<R, StoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let id = record.record_id();

        if inner.records.contains_key(&id) {
            return Err(StoreError::Duplicate {
                collection: R::COLLECTION,
                key: id.to_string(),
            });
        }
        if let Some(taken) = record.unique_keys().into_iter().find(|k| inner.keys.contains_key(k)) {
            return Err(StoreError::Duplicate {
                collection: R::COLLECTION,
                key: taken,
            });
        }

        inner.replace(id, record)
    }

    async fn update(&self, record: R) -> Result<R, StoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let id = record.record_id();
        if !inner.records.contains_key(&id) {
            return Err(StoreError::NotFound {
                collection: R::COLLECTION,
                id,
            });
        }
        inner.replace(id, record)
    }

    async fn conditional_update(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        record: R,
    ) -> Result<Option<R>, StoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let Some(current) = inner.records.get(&id) else {
            return Err(StoreError::NotFound {
                collection: R::COLLECTION,
                id,
            });
        };

        if !expected.matches(current.version()) {
            return Ok(None);
        }
        inner.replace(id, record).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_core::{Money, PaymentId, UserId};
    use bazaar_events::execute;
    use bazaar_payments::{
        CompletePayment, InitiatePayment, Payment, PaymentCommand, PaymentMethod,
    };
    use chrono::Utc;

    fn payment(transaction_id: &str) -> Payment {
        let id = PaymentId::generate();
        let mut p = Payment::empty(id);
        execute(
            &mut p,
            &PaymentCommand::InitiatePayment(InitiatePayment {
                payment_id: id,
                user_id: UserId::new(),
                amount: Money(10_000),
                currency: "NGN".to_string(),
                method: PaymentMethod::Card,
                transaction_id: transaction_id.to_string(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        p
    }

    #[tokio::test]
    async fn unique_key_rejects_second_record() {
        let store = InMemoryRecordStore::<Payment>::new();
        store.create(payment("txn-1")).await.unwrap();

        let err = store.create(payment("txn-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));

        let found = store.find_by_unique_key("txn:txn-1").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn conditional_update_checks_version() {
        let store = InMemoryRecordStore::<Payment>::new();
        let p = store.create(payment("txn-2")).await.unwrap();
        let id = p.record_id();

        let stale = ExpectedVersion::Exact(p.version() + 1);
        assert!(store.conditional_update(id, stale, p.clone()).await.unwrap().is_none());

        let current = ExpectedVersion::Exact(p.version());
        assert!(store.conditional_update(id, current, p).await.unwrap().is_some());
    }

    fn completed(mut p: Payment, reference: &str) -> Payment {
        let payment_id = p.id_typed();
        execute(
            &mut p,
            &PaymentCommand::CompletePayment(CompletePayment {
                payment_id,
                provider_reference: reference.to_string(),
                verified_amount: Money(10_000),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        p
    }

    #[tokio::test]
    async fn keys_gained_on_update_are_claimed() {
        let store = InMemoryRecordStore::<Payment>::new();
        let first = store.create(payment("txn-4")).await.unwrap();
        let second = store.create(payment("txn-5")).await.unwrap();

        let first_version = first.version();
        let first = completed(first, "ch_1");
        store
            .conditional_update(first.record_id(), ExpectedVersion::Exact(first_version), first.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            store.find_by_unique_key("ref:ch_1").await.unwrap().map(|p| p.record_id()),
            Some(first.record_id())
        );

        let second_version = second.version();
        let second_id = second.record_id();
        let err = store
            .conditional_update(second_id, ExpectedVersion::Exact(second_version), completed(second, "ch_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { ref key, .. } if key == "ref:ch_1"));

        let untouched = store.find_by_id(second_id).await.unwrap().unwrap();
        assert_eq!(untouched.version(), second_version);
        assert_eq!(untouched.provider_reference(), None);

        // Rewriting a record with its own keys is fine.
        store.update(first).await.unwrap();
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let store = InMemoryRecordStore::<Payment>::new();
        let err = store.update(payment("txn-3")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn find_applies_filter() {
        let store = InMemoryRecordStore::<Payment>::new();
        store.create(payment("a")).await.unwrap();
        store.create(payment("b")).await.unwrap();

        let only_a = store.find(&|p: &Payment| p.transaction_id() == "a").await.unwrap();
        assert_eq!(only_a.len(), 1);
    }
}
