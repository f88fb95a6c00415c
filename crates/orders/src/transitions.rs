//! Order kinds, statuses and the legal transition table.

use serde::{Deserialize, Serialize};

use bazaar_catalog::ListingKind;
use bazaar_core::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Product,
    Ticket,
    Booking,
}

impl OrderKind {
    pub fn for_listing(kind: ListingKind) -> Self {
        match kind {
            ListingKind::Product => OrderKind::Product,
            ListingKind::Ticket => OrderKind::Ticket,
            ListingKind::Service => OrderKind::Booking,
        }
    }

    /// Legal `(from, to)` pairs for this kind.
    pub fn transitions(self) -> &'static [(OrderStatus, OrderStatus)] {
        use OrderStatus::*;

        match self {
            OrderKind::Product => &[
                (Pending, Paid),
                (Pending, Confirmed),
                (Paid, Confirmed),
                (Paid, Shipped),
                (Confirmed, Shipped),
                (Shipped, Delivered),
                (Pending, Cancelled),
            ],
            OrderKind::Ticket => &[
                (Pending, Paid),
                (Pending, Confirmed),
                (Paid, Confirmed),
                (Paid, Used),
                (Confirmed, Used),
                (Pending, Cancelled),
            ],
            OrderKind::Booking => &[
                (Pending, Confirmed),
                (Confirmed, InProgress),
                (InProgress, Completed),
                (Pending, Cancelled),
            ],
        }
    }

    pub fn allows(self, from: OrderStatus, to: OrderStatus) -> bool {
        self.transitions().contains(&(from, to))
    }

    /// Whether settlement moves orders of this kind to `paid`.
    pub fn is_paid_on_settlement(self) -> bool {
        self.allows(OrderStatus::Pending, OrderStatus::Paid)
    }

    /// Whether this kind ships and therefore carries a delivery fee.
    pub fn ships(self) -> bool {
        self == OrderKind::Product
    }
}

impl core::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            OrderKind::Product => "product",
            OrderKind::Ticket => "ticket",
            OrderKind::Booking => "booking",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Used,
    InProgress,
    Completed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 9] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Used,
        OrderStatus::InProgress,
        OrderStatus::Completed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::Used
                | OrderStatus::Completed
                | OrderStatus::Cancelled
        )
    }

    /// Terminal and successful.
    pub fn is_fulfilled(self) -> bool {
        self.is_terminal() && self != OrderStatus::Cancelled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Used => "used",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}
