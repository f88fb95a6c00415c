//! Command execution for document-stored aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the record (or start from an empty aggregate on create)
//!   ↓
//! 2. Handle + apply (pure, `bazaar_events::execute`)
//!   ↓
//! 3. Persist: `create`, or `conditional_update` against the loaded version
//!   ↓
//! 4. Publish one envelope per event to the bus
//! ```
//!
//! A lost compare-and-swap surfaces as `ServiceError::Concurrency`; nothing is
//! published for it. Publication happens after the write, so a publish
//! failure never rolls back a committed record (it is logged).

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use bazaar_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion};
use bazaar_events::{Event, EventBus, EventEnvelope, execute};

use crate::errors::{ServiceError, ServiceResult};
use crate::store::{Record, RecordStore};

/// Envelope type carried on the ledger bus.
pub type LedgerEnvelope = EventEnvelope<JsonValue>;

/// Object-safe publishing side of an [`EventBus`] of ledger envelopes.
pub trait EnvelopeSink: Send + Sync {
    fn publish_envelope(&self, envelope: LedgerEnvelope) -> Result<(), String>;
}

impl<B> EnvelopeSink for B
where
    B: EventBus<LedgerEnvelope>,
{
    fn publish_envelope(&self, envelope: LedgerEnvelope) -> Result<(), String> {
        self.publish(envelope).map_err(|e| format!("{e:?}"))
    }
}

#[derive(Clone)]
pub struct RecordDispatcher {
    sink: Arc<dyn EnvelopeSink>,
}

impl RecordDispatcher {
    pub fn new(sink: Arc<dyn EnvelopeSink>) -> Self {
        Self { sink }
    }

    /// Run a creating command against `empty` and insert the result.
    pub async fn create<A>(
        &self,
        store: &dyn RecordStore<A>,
        mut empty: A,
        command: &A::Command,
    ) -> ServiceResult<A>
    where
        A: Record + Aggregate<Error = DomainError>,
        A::Event: Event + Serialize,
    {
        let base = empty.version();
        let events = execute(&mut empty, command)?;
        let stored = store.create(empty).await?;
        self.publish(&stored, base, &events);
        Ok(stored)
    }

    /// Load the record by id and run `command` on it.
    pub async fn dispatch<A>(
        &self,
        store: &dyn RecordStore<A>,
        id: AggregateId,
        command: &A::Command,
    ) -> ServiceResult<A>
    where
        A: Record + Aggregate<Error = DomainError>,
        A::Event: Event + Serialize,
    {
        let current = load(store, id).await?;
        self.dispatch_on(store, current, command).await
    }

    /// Run `command` on a snapshot the caller already holds.
    ///
    /// The write only lands if the stored version still equals the snapshot's.
    pub async fn dispatch_on<A>(
        &self,
        store: &dyn RecordStore<A>,
        mut snapshot: A,
        command: &A::Command,
    ) -> ServiceResult<A>
    where
        A: Record + Aggregate<Error = DomainError>,
        A::Event: Event + Serialize,
    {
        let id = snapshot.record_id();
        let base = snapshot.version();
        let events = execute(&mut snapshot, command)?;
        if events.is_empty() {
            return Ok(snapshot);
        }

        match store
            .conditional_update(id, ExpectedVersion::Exact(base), snapshot)
            .await?
        {
            Some(saved) => {
                self.publish(&saved, base, &events);
                Ok(saved)
            }
            None => Err(ServiceError::Concurrency(format!(
                "{} {id} changed after version {base}",
                A::COLLECTION
            ))),
        }
    }

    /// `dispatch`, re-reading the record after each lost compare-and-swap.
    ///
    /// Domain errors are returned at once; only `Concurrency` is retried.
    pub async fn dispatch_with_retry<A>(
        &self,
        store: &dyn RecordStore<A>,
        id: AggregateId,
        command: &A::Command,
        attempts: u32,
    ) -> ServiceResult<A>
    where
        A: Record + Aggregate<Error = DomainError>,
        A::Event: Event + Serialize,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.dispatch(store, id, command).await {
                Err(ServiceError::Concurrency(msg)) if attempt < attempts => {
                    debug!(
                        collection = A::COLLECTION,
                        id = %id,
                        attempt,
                        reason = %msg,
                        "lost compare-and-swap; retrying"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn publish<A>(&self, record: &A, base: u64, events: &[A::Event])
    where
        A: Record + Aggregate,
        A::Event: Event + Serialize,
    {
        for (offset, event) in events.iter().enumerate() {
            let payload = match serde_json::to_value(event) {
                Ok(v) => v,
                Err(e) => {
                    warn!(event_type = event.event_type(), error = %e, "event payload serialization failed");
                    continue;
                }
            };

            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                record.record_id(),
                A::COLLECTION,
                base + offset as u64 + 1,
                event.event_type(),
                event.occurred_at(),
                payload,
            );

            if let Err(e) = self.sink.publish_envelope(envelope) {
                warn!(event_type = event.event_type(), error = %e, "event publish failed after commit");
            }
        }
    }
}

/// Fetch a record or fail with `NotFound`.
pub async fn load<A: Record>(store: &dyn RecordStore<A>, id: AggregateId) -> ServiceResult<A> {
    store
        .find_by_id(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("{} {id}", A::COLLECTION)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bazaar_catalog::{
        CreateListing, Listing, ListingCommand, ListingKind, ReserveStock,
    };
    use bazaar_core::{ListingId, Money, UserId};
    use bazaar_events::InMemoryEventBus;
    use chrono::Utc;

    use crate::store::InMemoryRecordStore;

    fn create_cmd(id: ListingId, available: u32) -> ListingCommand {
        ListingCommand::CreateListing(CreateListing {
            listing_id: id,
            seller_id: UserId::new(),
            kind: ListingKind::Product,
            title: "Lamp".to_string(),
            unit_price: Money(5_000),
            currency: "NGN".to_string(),
            available,
            occurred_at: Utc::now(),
        })
    }

    fn reserve(id: ListingId, quantity: u32) -> ListingCommand {
        ListingCommand::ReserveStock(ReserveStock {
            listing_id: id,
            quantity,
            occurred_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn create_then_dispatch_publishes_sequenced_envelopes() {
        let bus = Arc::new(InMemoryEventBus::<LedgerEnvelope>::new());
        let sub = bus.subscribe();
        let dispatcher = RecordDispatcher::new(bus.clone());
        let store = InMemoryRecordStore::<Listing>::new();

        let id = ListingId::generate();
        dispatcher
            .create(&store, Listing::empty(id), &create_cmd(id, 3))
            .await
            .unwrap();
        let after = dispatcher.dispatch(&store, id.0, &reserve(id, 2)).await.unwrap();
        assert_eq!(after.available(), 1);

        let first = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first.aggregate_type(), "catalog.listing");
        assert_eq!(first.sequence_number(), 1);
        assert_eq!(second.sequence_number(), 2);
        assert_eq!(second.event_type(), "catalog.listing.stock_reserved");
    }

    #[tokio::test]
    async fn stale_snapshot_loses_the_swap() {
        let bus = Arc::new(InMemoryEventBus::<LedgerEnvelope>::new());
        let dispatcher = RecordDispatcher::new(bus);
        let store = InMemoryRecordStore::<Listing>::new();

        let id = ListingId::generate();
        let snapshot = dispatcher
            .create(&store, Listing::empty(id), &create_cmd(id, 5))
            .await
            .unwrap();

        dispatcher.dispatch(&store, id.0, &reserve(id, 1)).await.unwrap();
        let err = dispatcher
            .dispatch_on(&store, snapshot, &reserve(id, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Concurrency(_)));

        let current = load(&store, id.0).await.unwrap();
        assert_eq!(current.available(), 4);
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let bus = Arc::new(InMemoryEventBus::<LedgerEnvelope>::new());
        let dispatcher = RecordDispatcher::new(bus);
        let store = InMemoryRecordStore::<Listing>::new();

        let id = ListingId::generate();
        dispatcher
            .create(&store, Listing::empty(id), &create_cmd(id, 1))
            .await
            .unwrap();

        let err = dispatcher
            .dispatch_with_retry(&store, id.0, &reserve(id, 2), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn dispatch_on_missing_record_is_not_found() {
        let bus = Arc::new(InMemoryEventBus::<LedgerEnvelope>::new());
        let dispatcher = RecordDispatcher::new(bus);
        let store = InMemoryRecordStore::<Listing>::new();

        let id = ListingId::generate();
        let err = dispatcher.dispatch(&store, id.0, &reserve(id, 1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::NotFound(_))));
    }
}
