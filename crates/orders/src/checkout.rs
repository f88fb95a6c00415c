//! Checkout planning: turns a cart into one order draft per seller and kind.
//!
//! Pure; availability checks and reservations happen in the order service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bazaar_catalog::Listing;
use bazaar_core::{DomainError, DomainResult, ListingId, Money, UserId};

use crate::order::LineItem;
use crate::transitions::OrderKind;

/// A cart line as submitted by the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedLine {
    pub listing_id: ListingId,
    pub quantity: u32,
}

/// Collapse repeated listings into one line, keeping first-seen order.
pub fn merge_requested(lines: &[RequestedLine]) -> DomainResult<Vec<RequestedLine>> {
    if lines.is_empty() {
        return Err(DomainError::validation("checkout requires at least one line"));
    }

    let mut merged: Vec<RequestedLine> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        match merged.iter_mut().find(|m| m.listing_id == line.listing_id) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(line.quantity)
                    .ok_or_else(|| DomainError::validation("quantity too large"))?;
            }
            None => merged.push(*line),
        }
    }
    Ok(merged)
}

/// A cart line priced against its listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub listing_id: ListingId,
    pub seller_id: UserId,
    pub kind: OrderKind,
    pub title: String,
    pub unit_price: Money,
    pub currency: String,
    pub quantity: u32,
}

impl PricedLine {
    pub fn from_listing(listing: &Listing, quantity: u32) -> DomainResult<Self> {
        let seller_id = listing
            .seller_id()
            .ok_or_else(|| DomainError::not_found(format!("listing {}", listing.id_typed())))?;

        Ok(Self {
            listing_id: listing.id_typed(),
            seller_id,
            kind: OrderKind::for_listing(listing.kind()),
            title: listing.title().to_string(),
            unit_price: listing.unit_price(),
            currency: listing.currency().to_string(),
            quantity,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub seller_id: UserId,
    pub kind: OrderKind,
    pub lines: Vec<LineItem>,
    pub delivery_fee: Money,
    pub total_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutPlan {
    pub currency: String,
    pub orders: Vec<OrderDraft>,
    /// Amount the single payment covers.
    pub total_amount: Money,
}

/// Group priced lines into drafts. The delivery fee is charged once per
/// product order; tickets and bookings carry none.
pub fn plan_checkout(lines: Vec<PricedLine>, delivery_fee: Money) -> DomainResult<CheckoutPlan> {
    let currency = match lines.first() {
        Some(first) => first.currency.clone(),
        None => return Err(DomainError::validation("checkout requires at least one line")),
    };
    if lines.iter().any(|l| l.currency != currency) {
        return Err(DomainError::validation(
            "all items of one checkout must share a currency",
        ));
    }

    let mut groups: BTreeMap<(UserId, OrderKind), Vec<LineItem>> = BTreeMap::new();
    for line in lines {
        groups
            .entry((line.seller_id, line.kind))
            .or_default()
            .push(LineItem {
                listing_id: line.listing_id,
                title: line.title,
                quantity: line.quantity,
                unit_price: line.unit_price,
            });
    }

    let mut orders = Vec::with_capacity(groups.len());
    for ((seller_id, kind), lines) in groups {
        let fee = if kind.ships() { delivery_fee } else { Money::ZERO };
        let subtotals = lines
            .iter()
            .map(LineItem::subtotal)
            .collect::<DomainResult<Vec<_>>>()?;
        let total_amount = Money::sum(subtotals)?.checked_add(fee)?;

        orders.push(OrderDraft {
            seller_id,
            kind,
            lines,
            delivery_fee: fee,
            total_amount,
        });
    }

    let total_amount = Money::sum(orders.iter().map(|o| o.total_amount))?;

    Ok(CheckoutPlan {
        currency,
        orders,
        total_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priced(seller_id: UserId, kind: OrderKind, unit_price: u64, quantity: u32) -> PricedLine {
        PricedLine {
            listing_id: ListingId::generate(),
            seller_id,
            kind,
            title: "Item".to_string(),
            unit_price: Money(unit_price),
            currency: "NGN".to_string(),
            quantity,
        }
    }

    #[test]
    fn merge_sums_repeated_listings() {
        let a = ListingId::generate();
        let b = ListingId::generate();
        let merged = merge_requested(&[
            RequestedLine { listing_id: a, quantity: 1 },
            RequestedLine { listing_id: b, quantity: 2 },
            RequestedLine { listing_id: a, quantity: 3 },
        ])
        .unwrap();

        assert_eq!(
            merged,
            vec![
                RequestedLine { listing_id: a, quantity: 4 },
                RequestedLine { listing_id: b, quantity: 2 },
            ]
        );
    }

    #[test]
    fn merge_rejects_empty_cart_and_zero_quantity() {
        assert!(matches!(merge_requested(&[]), Err(DomainError::Validation(_))));
        let err = merge_requested(&[RequestedLine {
            listing_id: ListingId::generate(),
            quantity: 0,
        }])
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn one_order_per_seller_and_kind() {
        let s1 = UserId::new();
        let s2 = UserId::new();
        let plan = plan_checkout(
            vec![
                priced(s1, OrderKind::Product, 1_000, 2),
                priced(s1, OrderKind::Product, 500, 1),
                priced(s1, OrderKind::Ticket, 3_000, 1),
                priced(s2, OrderKind::Product, 10_000, 1),
            ],
            Money(200),
        )
        .unwrap();

        assert_eq!(plan.orders.len(), 3);

        let s1_products = plan
            .orders
            .iter()
            .find(|o| o.seller_id == s1 && o.kind == OrderKind::Product)
            .unwrap();
        assert_eq!(s1_products.lines.len(), 2);
        assert_eq!(s1_products.total_amount, Money(2_000 + 500 + 200));

        let s1_tickets = plan
            .orders
            .iter()
            .find(|o| o.seller_id == s1 && o.kind == OrderKind::Ticket)
            .unwrap();
        assert_eq!(s1_tickets.delivery_fee, Money::ZERO);

        assert_eq!(plan.total_amount, Money(2_700 + 3_000 + 10_200));
    }

    #[test]
    fn mixed_currencies_are_rejected() {
        let seller = UserId::new();
        let mut usd = priced(seller, OrderKind::Product, 100, 1);
        usd.currency = "USD".to_string();

        let err = plan_checkout(vec![priced(seller, OrderKind::Product, 100, 1), usd], Money::ZERO)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
