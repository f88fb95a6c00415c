use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use bazaar_catalog::{Listing, ListingKind, Subscription, SubscriptionTier};
use bazaar_orders::{Order, OrderStatus};
use bazaar_payments::{Commission, Payment, PaymentMethod};
use bazaar_payouts::Payout;
use bazaar_infra::payouts::PayoutRunReport;
use bazaar_infra::projections::SellerStats;
use bazaar_infra::services::{Checkout, Refund, Settlement};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub kind: ListingKind,
    pub title: String,
    /// Minor units.
    pub unit_price: u64,
    pub currency: Option<String>,
    pub available: u32,
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub tier: SubscriptionTier,
    pub period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct OrderLineRequest {
    pub listing_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub lines: Vec<OrderLineRequest>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub delivery_fee: u64,
    pub shipping_address: Option<String>,
    pub transaction_id: Option<String>,
    /// Provider reference of a charge made at checkout; settles immediately.
    pub charge_reference: Option<String>,
}

/// `status` stays a string so an unknown target answers with a validation error.
#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
}

impl ChangeStatusRequest {
    pub fn target(&self) -> Result<OrderStatus, bazaar_core::DomainError> {
        self.status.parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub provider_reference: String,
}

/// `GET /orders?view=seller` lists orders to fulfil instead of purchases.
#[derive(Debug, Default, Deserialize)]
pub struct OrdersQuery {
    pub view: Option<String>,
}

// -------------------------
// Response mapping
// -------------------------

fn opt_id<T: ToString>(id: Option<T>) -> Option<String> {
    id.map(|v| v.to_string())
}

pub fn listing_to_json(listing: &Listing) -> serde_json::Value {
    json!({
        "id": listing.id_typed().to_string(),
        "seller_id": opt_id(listing.seller_id()),
        "kind": listing.kind(),
        "title": listing.title(),
        "unit_price": listing.unit_price().0,
        "currency": listing.currency(),
        "available": listing.available(),
        "status": listing.status().to_string(),
        "created_at": listing.created_at(),
        "updated_at": listing.updated_at(),
    })
}

pub fn subscription_to_json(subscription: &Subscription, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "id": subscription.id_typed().to_string(),
        "user_id": opt_id(subscription.user_id()),
        "tier": subscription.tier(),
        "product_limit": subscription.product_limit(),
        "effective_limit": subscription.effective_limit(now),
        "current_period_end": subscription.current_period_end(),
    })
}

pub fn order_to_json(order: &Order) -> serde_json::Value {
    json!({
        "id": order.id_typed().to_string(),
        "customer_id": opt_id(order.customer_id()),
        "seller_id": opt_id(order.seller_id()),
        "kind": order.kind(),
        "status": order.status().to_string(),
        "lines": order.lines().iter().map(|l| json!({
            "listing_id": l.listing_id.to_string(),
            "title": l.title,
            "quantity": l.quantity,
            "unit_price": l.unit_price.0,
        })).collect::<Vec<_>>(),
        "delivery_fee": order.delivery_fee().0,
        "total_amount": order.total_amount().0,
        "currency": order.currency(),
        "payment_id": opt_id(order.payment_id()),
        "shipping_address": order.shipping_address(),
        "delivery_tracking": order.delivery_tracking(),
        "created_at": order.created_at(),
        "updated_at": order.updated_at(),
    })
}

pub fn payment_to_json(payment: &Payment) -> serde_json::Value {
    json!({
        "id": payment.id_typed().to_string(),
        "user_id": opt_id(payment.user_id()),
        "amount": payment.amount().0,
        "currency": payment.currency(),
        "method": payment.method(),
        "status": payment.status(),
        "transaction_id": payment.transaction_id(),
        "provider_reference": payment.provider_reference(),
        "failure_reason": payment.failure_reason(),
        "created_at": payment.created_at(),
        "updated_at": payment.updated_at(),
    })
}

pub fn commission_to_json(commission: &Commission) -> serde_json::Value {
    json!({
        "id": commission.id_typed().to_string(),
        "payment_id": opt_id(commission.payment_id()),
        "order_id": opt_id(commission.order_id()),
        "seller_id": opt_id(commission.seller_id()),
        "currency": commission.currency(),
        "total_amount": commission.total_amount().0,
        "commission_rate_bps": commission.commission_rate().bps(),
        "commission_amount": commission.commission_amount().0,
        "seller_amount": commission.seller_amount().0,
        "status": commission.status(),
        "escrow_status": commission.escrow_status(),
        "escrow_release_date": commission.escrow_release_date(),
        "payout_id": opt_id(commission.payout_id()),
        "created_at": commission.created_at(),
    })
}

pub fn payout_to_json(payout: &Payout) -> serde_json::Value {
    json!({
        "id": payout.id_typed().to_string(),
        "seller_id": opt_id(payout.seller_id()),
        "amount": payout.amount().0,
        "currency": payout.currency(),
        "status": payout.status(),
        "commission_ids": payout.commission_ids().iter().map(|c| c.to_string()).collect::<Vec<_>>(),
        "scheduled_date": payout.scheduled_date(),
        "processed_date": payout.processed_date(),
        "retry_count": payout.retry_count(),
        "transfer_id": payout.transfer_id(),
        "last_error": payout.last_error(),
        "created_at": payout.created_at(),
    })
}

pub fn checkout_to_json(checkout: &Checkout) -> serde_json::Value {
    json!({
        "payment": payment_to_json(&checkout.payment),
        "orders": checkout.orders.iter().map(order_to_json).collect::<Vec<_>>(),
        "commissions": checkout.commissions.iter().map(commission_to_json).collect::<Vec<_>>(),
    })
}

pub fn settlement_to_json(settlement: &Settlement) -> serde_json::Value {
    json!({
        "payment": payment_to_json(&settlement.payment),
        "orders": settlement.orders.iter().map(order_to_json).collect::<Vec<_>>(),
        "commissions": settlement.commissions.iter().map(commission_to_json).collect::<Vec<_>>(),
    })
}

pub fn refund_to_json(refund: &Refund) -> serde_json::Value {
    json!({
        "payment": payment_to_json(&refund.payment),
        "commissions": refund.commissions.iter().map(commission_to_json).collect::<Vec<_>>(),
        "cancelled_payouts": refund.cancelled_payouts.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
    })
}

pub fn run_report_to_json(report: &PayoutRunReport) -> serde_json::Value {
    json!({
        "created": report.created,
        "succeeded": report.succeeded,
        "failed": report.failed,
        "in_flight": report.in_flight,
        "rescheduled": report.rescheduled,
        "skipped_below_threshold": report.skipped_below_threshold,
        "errors": report.errors.iter().map(|e| json!({
            "seller_id": opt_id(e.seller_id),
            "payout_id": opt_id(e.payout_id),
            "message": e.message,
            "retryable": e.retryable,
        })).collect::<Vec<_>>(),
    })
}

pub fn seller_stats_to_json(stats: &SellerStats) -> serde_json::Value {
    json!({
        "seller_id": opt_id(stats.seller_id),
        "total_orders": stats.total_orders,
        "fulfilled_orders": stats.fulfilled_orders,
        "cancelled_orders": stats.cancelled_orders,
        "gross_fulfilled_sales": stats.gross_fulfilled_sales.0,
        "average_order_value": stats.average_order_value.0,
    })
}
