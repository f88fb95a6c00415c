use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bazaar_core::AggregateId;

/// One ledger event as it leaves the dispatcher.
///
/// `aggregate_type` is the record collection (`orders.order`, `payouts.payout`)
/// and `sequence_number` the record version the event produced, so consumers
/// can drop replays and spot gaps per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    aggregate_id: AggregateId,
    aggregate_type: String,
    sequence_number: u64,
    event_type: String,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    /// Whether the event came from a record of `collection`.
    pub fn is_from(&self, collection: &str) -> bool {
        self.aggregate_type == collection
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_knows_its_collection() {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "orders.order",
            3,
            "orders.order.status_changed",
            Utc::now(),
            "shipped".to_string(),
        );

        assert!(envelope.is_from("orders.order"));
        assert!(!envelope.is_from("payouts.payout"));
        assert_eq!(envelope.sequence_number(), 3);
    }
}
