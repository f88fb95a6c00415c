use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use bazaar_catalog::{Listing, ListingCommand, ReleaseStock, ReserveStock};
use bazaar_core::{DomainError, ListingId, Money, OrderId, PaymentId, UserId};
use bazaar_orders::{
    Actor, ChangeStatus, CheckoutPlan, DeleteOrder, Order, OrderCommand, OrderStatus, PlaceOrder,
    PricedLine, RequestedLine, merge_requested, plan_checkout,
};
use bazaar_payments::{
    Commission, FailPayment, InitiatePayment, Payment, PaymentCommand, PaymentMethod,
    PaymentStatus,
};

use crate::dispatcher::load;
use crate::errors::{ServiceError, ServiceResult};
use crate::ledger::Ledger;
use crate::notifier::{Notification, notify_best_effort};

use super::SettlementService;
use super::settlement::{mark_refunded, open_payouts_of, refund_commissions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub customer_id: UserId,
    pub lines: Vec<RequestedLine>,
    pub payment_method: PaymentMethod,
    /// Charged once per product order.
    pub delivery_fee: Money,
    pub shipping_address: Option<String>,
    /// Client-supplied idempotency key; generated when absent.
    pub transaction_id: Option<String>,
    /// Charge the customer already made at checkout (upfront payment).
    /// When present the payment is verified and settled before returning.
    pub charge_reference: Option<String>,
}

/// Outcome of a checkout: one payment covering one order per seller and kind.
///
/// The payment is `pending` unless the checkout was paid upfront, in which
/// case it is `completed` and `commissions` holds one entry per order.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub payment: Payment,
    pub orders: Vec<Order>,
    pub commissions: Vec<Commission>,
}

#[derive(Clone)]
pub struct OrderService {
    ledger: Arc<Ledger>,
}

impl OrderService {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Reserve stock, open the payment and place the orders.
    ///
    /// Reservations are compare-and-swap updates on each listing. If any later
    /// step fails, reservations already made are released before returning.
    pub async fn create_order(
        &self,
        request: CheckoutRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<Checkout> {
        let requested = merge_requested(&request.lines)?;

        let mut priced = Vec::with_capacity(requested.len());
        for line in &requested {
            let listing = load(&*self.ledger.stores.listings, line.listing_id.0).await?;
            if listing.is_owned_by(request.customer_id) {
                return Err(DomainError::validation("sellers cannot buy their own listings").into());
            }
            priced.push(PricedLine::from_listing(&listing, line.quantity)?);
        }
        let plan = plan_checkout(priced, request.delivery_fee)?;

        let mut reserved: Vec<RequestedLine> = Vec::with_capacity(requested.len());
        for line in &requested {
            match self.reserve(*line, now).await {
                Ok(_) => reserved.push(*line),
                Err(e) => {
                    self.release_all(&reserved, now).await;
                    return Err(e);
                }
            }
        }

        match self.open_payment_and_orders(&request, &plan, now).await {
            Ok(checkout) => {
                info!(
                    payment_id = %checkout.payment.id_typed(),
                    customer_id = %request.customer_id,
                    orders = checkout.orders.len(),
                    total = %plan.total_amount,
                    "checkout placed"
                );
                for order in &checkout.orders {
                    self.notify_parties(order).await;
                }
                match request.charge_reference.as_deref() {
                    Some(reference) => self.settle_upfront(checkout, reference, now).await,
                    None => Ok(checkout),
                }
            }
            Err(e) => {
                warn!(customer_id = %request.customer_id, error = %e, "checkout failed after reservation; releasing stock");
                self.release_all(&reserved, now).await;
                Err(e)
            }
        }
    }

    async fn open_payment_and_orders(
        &self,
        request: &CheckoutRequest,
        plan: &CheckoutPlan,
        now: DateTime<Utc>,
    ) -> ServiceResult<Checkout> {
        let ledger = &self.ledger;
        let payment_id = PaymentId::generate();
        let transaction_id = request
            .transaction_id
            .clone()
            .unwrap_or_else(|| format!("txn_{}", Uuid::now_v7().simple()));

        let payment = ledger
            .dispatcher
            .create(
                &*ledger.stores.payments,
                Payment::empty(payment_id),
                &PaymentCommand::InitiatePayment(InitiatePayment {
                    payment_id,
                    user_id: request.customer_id,
                    amount: plan.total_amount,
                    currency: plan.currency.clone(),
                    method: request.payment_method,
                    transaction_id,
                    occurred_at: now,
                }),
            )
            .await?;

        let mut orders = Vec::with_capacity(plan.orders.len());
        for draft in &plan.orders {
            let order_id = OrderId::generate();
            let command = OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                customer_id: request.customer_id,
                seller_id: draft.seller_id,
                kind: draft.kind,
                lines: draft.lines.clone(),
                delivery_fee: draft.delivery_fee,
                currency: plan.currency.clone(),
                payment_id,
                shipping_address: request.shipping_address.clone(),
                occurred_at: now,
            });

            match ledger
                .dispatcher
                .create(&*ledger.stores.orders, Order::empty(order_id), &command)
                .await
            {
                Ok(order) => orders.push(order),
                Err(e) => {
                    self.abandon(&payment, &orders, now).await;
                    return Err(e);
                }
            }
        }

        Ok(Checkout {
            payment,
            orders,
            commissions: Vec::new(),
        })
    }

    /// Verify and settle an upfront charge for a freshly placed checkout.
    ///
    /// A rejected charge fails the payment, which cancels the orders and gives
    /// the stock back. A provider outage leaves the payment `pending`, to be
    /// confirmed later under the same transaction id.
    async fn settle_upfront(&self, checkout: Checkout, reference: &str, now: DateTime<Utc>) -> ServiceResult<Checkout> {
        let settlement = SettlementService::new(self.ledger.clone());
        let transaction_id = checkout.payment.transaction_id().to_string();

        match settlement.confirm_payment(&transaction_id, reference, now).await {
            Ok(settled) => Ok(Checkout {
                payment: settled.payment,
                orders: settled.orders,
                commissions: settled.commissions,
            }),
            Err(ServiceError::Provider(e)) => {
                warn!(transaction_id = %transaction_id, error = %e, "upfront charge not verified; payment stays pending");
                Err(e.into())
            }
            Err(e) => {
                warn!(transaction_id = %transaction_id, error = %e, "upfront charge rejected; abandoning checkout");
                if let Err(fail) = settlement.fail_payment(&transaction_id, "upfront charge rejected", now).await {
                    error!(transaction_id = %transaction_id, error = %fail, "could not fail payment of rejected upfront charge");
                }
                Err(e)
            }
        }
    }

    /// Undo a half-written checkout: cancel the orders placed so far and fail
    /// the payment. Stock is released by the caller.
    async fn abandon(&self, payment: &Payment, orders: &[Order], now: DateTime<Utc>) {
        let ledger = &self.ledger;
        for order in orders {
            let command = OrderCommand::ChangeStatus(ChangeStatus {
                order_id: order.id_typed(),
                to: OrderStatus::Cancelled,
                actor: Actor::System,
                occurred_at: now,
            });
            if let Err(e) = ledger.dispatcher.dispatch_on(&*ledger.stores.orders, order.clone(), &command).await {
                error!(order_id = %order.id_typed(), error = %e, "could not cancel abandoned order");
            }
        }

        let command = PaymentCommand::FailPayment(FailPayment {
            payment_id: payment.id_typed(),
            reason: "checkout abandoned".to_string(),
            occurred_at: now,
        });
        if let Err(e) = ledger.dispatcher.dispatch_on(&*ledger.stores.payments, payment.clone(), &command).await {
            error!(payment_id = %payment.id_typed(), error = %e, "could not fail abandoned payment");
        }
    }

    async fn reserve(&self, line: RequestedLine, now: DateTime<Utc>) -> ServiceResult<Listing> {
        let command = ListingCommand::ReserveStock(ReserveStock {
            listing_id: line.listing_id,
            quantity: line.quantity,
            occurred_at: now,
        });
        self.ledger
            .dispatcher
            .dispatch_with_retry(
                &*self.ledger.stores.listings,
                line.listing_id.0,
                &command,
                self.ledger.config.reservation_attempts,
            )
            .await
    }

    async fn release(&self, listing_id: ListingId, quantity: u32, now: DateTime<Utc>) -> ServiceResult<Listing> {
        let command = ListingCommand::ReleaseStock(ReleaseStock {
            listing_id,
            quantity,
            occurred_at: now,
        });
        self.ledger
            .dispatcher
            .dispatch_with_retry(
                &*self.ledger.stores.listings,
                listing_id.0,
                &command,
                self.ledger.config.reservation_attempts,
            )
            .await
    }

    async fn release_all(&self, lines: &[RequestedLine], now: DateTime<Utc>) {
        for line in lines {
            if let Err(e) = self.release(line.listing_id, line.quantity, now).await {
                error!(listing_id = %line.listing_id, quantity = line.quantity, error = %e, "stock release failed");
            }
        }
    }

    /// Move an order to `to` on behalf of `actor`.
    ///
    /// Cancellation gives the reserved stock back. Cancelling an order whose
    /// payment already settled also refunds its commission, and the payment
    /// itself once every order it covers is cancelled. Both parties are notified.
    pub async fn transition(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> ServiceResult<Order> {
        let ledger = &self.ledger;
        let current = load(&*ledger.stores.orders, order_id.0).await?;

        // Checked before the write: a payout mid-transfer cannot be unwound.
        if to == OrderStatus::Cancelled && current.status() == OrderStatus::Pending {
            let commissions = self.open_commissions(order_id).await?;
            open_payouts_of(ledger, &commissions).await?;
        }

        let command = OrderCommand::ChangeStatus(ChangeStatus {
            order_id,
            to,
            actor,
            occurred_at: now,
        });
        let order = ledger
            .dispatcher
            .dispatch_on(&*ledger.stores.orders, current, &command)
            .await?;

        info!(order_id = %order_id, status = %order.status(), actor = %actor, "order status changed");

        if to == OrderStatus::Cancelled {
            let lines: Vec<RequestedLine> = order
                .lines()
                .iter()
                .map(|l| RequestedLine {
                    listing_id: l.listing_id,
                    quantity: l.quantity,
                })
                .collect();
            self.release_all(&lines, now).await;
            self.unwind_settlement(&order, now).await?;
        }

        self.notify_parties(&order).await;
        Ok(order)
    }

    /// Commissions of `order_id` that still owe the seller money.
    async fn open_commissions(&self, order_id: OrderId) -> ServiceResult<Vec<Commission>> {
        Ok(self
            .ledger
            .stores
            .commissions
            .find(&move |c: &Commission| c.order_id() == Some(order_id) && !c.status().is_terminal())
            .await?)
    }

    /// Undo what settlement did for a cancelled order.
    async fn unwind_settlement(&self, order: &Order, now: DateTime<Utc>) -> ServiceResult<()> {
        let ledger = &self.ledger;
        let order_id = order.id_typed();

        let commissions = self.open_commissions(order_id).await?;
        if !commissions.is_empty() {
            let open_payouts = open_payouts_of(ledger, &commissions).await?;
            refund_commissions(ledger, commissions, open_payouts, "order cancelled", now)
                .await
                .inspect_err(|e| error!(order_id = %order_id, error = %e, "cancelled order kept a live commission"))?;
        }

        let Some(payment_id) = order.payment_id() else {
            return Ok(());
        };
        let payment = load(&*ledger.stores.payments, payment_id.0).await?;
        if payment.status() != PaymentStatus::Completed {
            return Ok(());
        }
        let siblings = self.orders_for_payment(payment_id).await?;
        if siblings.iter().all(|o| o.status() == OrderStatus::Cancelled) {
            mark_refunded(ledger, payment, "every order cancelled", now).await?;
        }
        Ok(())
    }

    pub async fn cancel_order(&self, order_id: OrderId, actor: Actor, now: DateTime<Utc>) -> ServiceResult<Order> {
        self.transition(order_id, OrderStatus::Cancelled, actor, now).await
    }

    /// Soft-delete a delivered order.
    pub async fn delete_order(&self, order_id: OrderId, actor: Actor, now: DateTime<Utc>) -> ServiceResult<Order> {
        let command = OrderCommand::DeleteOrder(DeleteOrder {
            order_id,
            actor,
            occurred_at: now,
        });
        let order = self
            .ledger
            .dispatcher
            .dispatch(&*self.ledger.stores.orders, order_id.0, &command)
            .await?;
        info!(order_id = %order_id, actor = %actor, "order deleted");
        Ok(order)
    }

    /// Fetch an order visible to `viewer`. Deleted orders are not found.
    pub async fn get_order(&self, order_id: OrderId, viewer: Actor) -> ServiceResult<Order> {
        let order = load(&*self.ledger.stores.orders, order_id.0).await?;
        if order.is_deleted() {
            return Err(DomainError::not_found(format!("order {order_id}")).into());
        }
        match viewer {
            Actor::System | Actor::Admin(_) => Ok(order),
            Actor::User(user) if order.is_party(user) => Ok(order),
            Actor::User(_) => Err(DomainError::unauthorized("not a party to this order").into()),
        }
    }

    /// Newest first.
    pub async fn orders_for_customer(&self, customer_id: UserId) -> ServiceResult<Vec<Order>> {
        self.visible_orders(move |o: &Order| o.customer_id() == Some(customer_id))
            .await
    }

    /// Newest first.
    pub async fn orders_for_seller(&self, seller_id: UserId) -> ServiceResult<Vec<Order>> {
        self.visible_orders(move |o: &Order| o.seller_id() == Some(seller_id))
            .await
    }

    pub async fn orders_for_payment(&self, payment_id: PaymentId) -> ServiceResult<Vec<Order>> {
        let mut orders = self
            .ledger
            .stores
            .orders
            .find(&move |o: &Order| o.payment_id() == Some(payment_id))
            .await?;
        orders.sort_by_key(|o| o.created_at());
        Ok(orders)
    }

    async fn visible_orders<F>(&self, filter: F) -> ServiceResult<Vec<Order>>
    where
        F: Fn(&Order) -> bool + Send + Sync,
    {
        let mut orders = self
            .ledger
            .stores
            .orders
            .find(&move |o: &Order| !o.is_deleted() && filter(o))
            .await?;
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    async fn notify_parties(&self, order: &Order) {
        let notifier = &*self.ledger.notifier;
        for party in [order.customer_id(), order.seller_id()].into_iter().flatten() {
            notify_best_effort(notifier, party, Notification::order_status(order)).await;
        }
    }
}
