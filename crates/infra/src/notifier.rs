//! User notifications.
//!
//! Notifications are best effort: a failed delivery is logged by
//! [`notify_best_effort`] and never fails the ledger operation that caused it.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use bazaar_core::{Money, OrderId, PaymentId, PayoutId, UserId};
use bazaar_orders::{Order, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Order,
    Payment,
    Payout,
}

/// Structured payload attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum NotificationData {
    OrderStatus {
        order_id: OrderId,
        status: OrderStatus,
        total_amount: Money,
    },
    PaymentReceived {
        payment_id: PaymentId,
        transaction_id: String,
        amount: Money,
    },
    PaymentFailed {
        payment_id: PaymentId,
        transaction_id: String,
    },
    PaymentRefunded {
        payment_id: PaymentId,
        amount: Money,
    },
    PayoutSent {
        payout_id: PayoutId,
        amount: Money,
        transfer_id: String,
    },
    PayoutFailed {
        payout_id: PayoutId,
        amount: Money,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub data: NotificationData,
}

impl Notification {
    /// Status update for either party of an order.
    pub fn order_status(order: &Order) -> Self {
        let id = order.id_typed();
        let (title, message) = match order.status() {
            OrderStatus::Pending => ("Order placed", format!("Order {id} is awaiting payment.")),
            OrderStatus::Paid => ("Payment received", format!("Order {id} has been paid.")),
            OrderStatus::InProgress => ("Booking in progress", format!("Booking {id} has started.")),
            OrderStatus::Shipped => ("Order shipped", format!("Order {id} is on its way.")),
            OrderStatus::Delivered => ("Order delivered", format!("Order {id} was delivered.")),
            OrderStatus::Confirmed => ("Booking confirmed", format!("Booking {id} is confirmed.")),
            OrderStatus::Completed => ("Booking completed", format!("Booking {id} is complete.")),
            OrderStatus::Used => ("Ticket used", format!("Ticket order {id} was used.")),
            OrderStatus::Cancelled => ("Order cancelled", format!("Order {id} was cancelled.")),
        };

        Self {
            title: title.to_string(),
            message,
            kind: NotificationKind::Order,
            data: NotificationData::OrderStatus {
                order_id: id,
                status: order.status(),
                total_amount: order.total_amount(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub notification_id: Uuid,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: UserId,
        notification: Notification,
    ) -> Result<DeliveryReceipt, NotifyError>;
}

/// Deliver and swallow failures with a warning.
pub async fn notify_best_effort(notifier: &dyn Notifier, user_id: UserId, notification: Notification) {
    let title = notification.title.clone();
    if let Err(e) = notifier.notify(user_id, notification).await {
        warn!(user_id = %user_id, title = %title, error = %e, "notification dropped");
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        user_id: UserId,
        notification: Notification,
    ) -> Result<DeliveryReceipt, NotifyError> {
        let receipt = DeliveryReceipt {
            notification_id: Uuid::now_v7(),
            delivered_at: Utc::now(),
        };
        info!(
            user_id = %user_id,
            notification_id = %receipt.notification_id,
            kind = ?notification.kind,
            title = %notification.title,
            "notification"
        );
        Ok(receipt)
    }
}

/// Keeps every delivered notification; can be switched to fail every call.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(UserId, Notification)>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<(UserId, Notification)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, user_id: UserId) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, n)| n)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user_id: UserId,
        notification: Notification,
    ) -> Result<DeliveryReceipt, NotifyError> {
        if self.failing {
            return Err(NotifyError::Unavailable("recording notifier set to fail".to_string()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError::Unavailable("lock poisoned".to_string()))?;
        sent.push((user_id, notification));
        Ok(DeliveryReceipt {
            notification_id: Uuid::now_v7(),
            delivered_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payout_sent() -> Notification {
        Notification {
            title: "Payout sent".to_string(),
            message: "90.00 is on its way".to_string(),
            kind: NotificationKind::Payout,
            data: NotificationData::PayoutSent {
                payout_id: PayoutId::generate(),
                amount: Money(9_000),
                transfer_id: "trf_1".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn recording_notifier_keeps_deliveries() {
        let notifier = RecordingNotifier::new();
        let user = UserId::new();
        notify_best_effort(&notifier, user, payout_sent()).await;

        assert_eq!(notifier.sent_to(user).len(), 1);
        assert!(notifier.sent_to(UserId::new()).is_empty());
    }

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        let notifier = RecordingNotifier::failing();
        notify_best_effort(&notifier, UserId::new(), payout_sent()).await;
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn data_is_tagged_by_category() {
        let json = serde_json::to_value(payout_sent().data).unwrap();
        assert_eq!(json["category"], "payout_sent");
        assert_eq!(json["amount"], 9_000);
    }
}
