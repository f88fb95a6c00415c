//! Seller statistics built from order events.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use thiserror::Error;

use bazaar_core::{AggregateId, Money, UserId};
use bazaar_orders::{Order, OrderEvent, OrderStatus};

use crate::dispatcher::LedgerEnvelope;
use crate::store::Record;

/// Per-seller order counters.
///
/// `average_order_value` is gross fulfilled sales over fulfilled orders, 0 when
/// nothing was fulfilled yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SellerStats {
    pub seller_id: Option<UserId>,
    pub total_orders: u64,
    pub fulfilled_orders: u64,
    pub cancelled_orders: u64,
    pub gross_fulfilled_sales: Money,
    pub average_order_value: Money,
}

impl SellerStats {
    fn new(seller_id: UserId) -> Self {
        Self {
            seller_id: Some(seller_id),
            ..Default::default()
        }
    }

    fn recompute_average(&mut self) {
        self.average_order_value = match self.fulfilled_orders {
            0 => Money(0),
            n => Money(self.gross_fulfilled_sales.0 / n),
        };
    }
}

#[derive(Debug, Error)]
pub enum SellerStatsError {
    #[error("failed to deserialize order event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("sales total overflow for seller {0}")]
    Overflow(UserId),
}

/// Rebuildable from the order event stream; replays are ignored per order.
#[derive(Debug, Default)]
pub struct SellerStatsProjection {
    stats: RwLock<HashMap<UserId, SellerStats>>,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl SellerStatsProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroed stats for sellers without orders.
    pub fn get(&self, seller_id: UserId) -> SellerStats {
        self.stats
            .read()
            .ok()
            .and_then(|s| s.get(&seller_id).cloned())
            .unwrap_or_else(|| SellerStats::new(seller_id))
    }

    pub fn list(&self) -> Vec<SellerStats> {
        let mut all: Vec<SellerStats> = match self.stats.read() {
            Ok(s) => s.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        all.sort_by_key(|s| s.seller_id);
        all
    }

    pub fn reset(&self) {
        if let Ok(mut s) = self.stats.write() {
            s.clear();
        }
        if let Ok(mut c) = self.cursors.write() {
            c.clear();
        }
    }

    fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(c) => c.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut c) = self.cursors.write() {
            c.insert(aggregate_id, sequence_number);
        }
    }

    /// Apply one envelope. Envelopes of other collections are ignored.
    pub fn apply_envelope(&self, envelope: &LedgerEnvelope) -> Result<(), SellerStatsError> {
        if !envelope.is_from(Order::COLLECTION) {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(aggregate_id);

        if seq == 0 {
            return Err(SellerStatsError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(SellerStatsError::NonMonotonicSequence { last, found: seq });
        }

        let event: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SellerStatsError::Deserialize(e.to_string()))?;

        {
            let mut stats = match self.stats.write() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            match event {
                OrderEvent::OrderPlaced(e) => {
                    let entry = stats.entry(e.seller_id).or_insert_with(|| SellerStats::new(e.seller_id));
                    entry.total_orders += 1;
                }
                OrderEvent::OrderStatusChanged(e) => {
                    let entry = stats.entry(e.seller_id).or_insert_with(|| SellerStats::new(e.seller_id));
                    if e.to.is_fulfilled() {
                        entry.fulfilled_orders += 1;
                        entry.gross_fulfilled_sales = entry
                            .gross_fulfilled_sales
                            .checked_add(e.total_amount)
                            .map_err(|_| SellerStatsError::Overflow(e.seller_id))?;
                        entry.recompute_average();
                    } else if e.to == OrderStatus::Cancelled {
                        entry.cancelled_orders += 1;
                    }
                }
                OrderEvent::OrderDeleted(_) => {}
            }
        }

        self.update_cursor(aggregate_id, seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_core::{OrderId, PaymentId};
    use bazaar_events::{Event, EventEnvelope};
    use bazaar_orders::{Actor, OrderKind, OrderPlaced, OrderStatusChanged};
    use chrono::Utc;
    use uuid::Uuid;

    fn envelope(order_id: OrderId, seq: u64, event: OrderEvent) -> LedgerEnvelope {
        EventEnvelope::new(
            Uuid::now_v7(),
            order_id.0,
            Order::COLLECTION,
            seq,
            event.event_type(),
            event.occurred_at(),
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn placed(order_id: OrderId, seller_id: UserId, total: u64) -> OrderEvent {
        OrderEvent::OrderPlaced(OrderPlaced {
            order_id,
            customer_id: UserId::new(),
            seller_id,
            kind: OrderKind::Product,
            lines: Vec::new(),
            delivery_fee: Money(0),
            total_amount: Money(total),
            currency: "NGN".to_string(),
            payment_id: PaymentId::generate(),
            shipping_address: None,
            occurred_at: Utc::now(),
        })
    }

    fn changed(order_id: OrderId, seller_id: UserId, from: OrderStatus, to: OrderStatus, total: u64) -> OrderEvent {
        OrderEvent::OrderStatusChanged(OrderStatusChanged {
            order_id,
            customer_id: UserId::new(),
            seller_id,
            kind: OrderKind::Product,
            from,
            to,
            total_amount: Money(total),
            actor: Actor::System,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn average_is_over_fulfilled_orders_only() {
        let projection = SellerStatsProjection::new();
        let seller = UserId::new();

        let delivered = OrderId::generate();
        projection.apply_envelope(&envelope(delivered, 1, placed(delivered, seller, 10_000))).unwrap();
        projection
            .apply_envelope(&envelope(delivered, 2, changed(delivered, seller, OrderStatus::Shipped, OrderStatus::Delivered, 10_000)))
            .unwrap();

        let cancelled = OrderId::generate();
        projection.apply_envelope(&envelope(cancelled, 1, placed(cancelled, seller, 4_000))).unwrap();
        projection
            .apply_envelope(&envelope(cancelled, 2, changed(cancelled, seller, OrderStatus::Pending, OrderStatus::Cancelled, 4_000)))
            .unwrap();

        let stats = projection.get(seller);
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.fulfilled_orders, 1);
        assert_eq!(stats.cancelled_orders, 1);
        assert_eq!(stats.gross_fulfilled_sales, Money(10_000));
        assert_eq!(stats.average_order_value, Money(10_000));
    }

    #[test]
    fn unknown_seller_has_zero_average() {
        let projection = SellerStatsProjection::new();
        let stats = projection.get(UserId::new());
        assert_eq!(stats.fulfilled_orders, 0);
        assert_eq!(stats.average_order_value, Money(0));
    }

    #[test]
    fn replays_are_ignored_and_gaps_rejected() {
        let projection = SellerStatsProjection::new();
        let seller = UserId::new();
        let order = OrderId::generate();
        let first = envelope(order, 1, placed(order, seller, 500));

        projection.apply_envelope(&first).unwrap();
        projection.apply_envelope(&first).unwrap();
        assert_eq!(projection.get(seller).total_orders, 1);

        let gap = envelope(order, 3, changed(order, seller, OrderStatus::Shipped, OrderStatus::Delivered, 500));
        assert!(matches!(
            projection.apply_envelope(&gap),
            Err(SellerStatsError::NonMonotonicSequence { last: 1, found: 3 })
        ));
    }

    #[test]
    fn other_collections_are_skipped() {
        let projection = SellerStatsProjection::new();
        let env: LedgerEnvelope = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "payments.payment",
            1,
            "payment_initiated",
            Utc::now(),
            serde_json::json!({"type": "payment_initiated"}),
        );
        projection.apply_envelope(&env).unwrap();
        assert!(projection.list().is_empty());
    }
}
