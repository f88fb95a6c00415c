use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use bazaar_core::{CommissionId, DomainError, PayoutId, UserId};
use bazaar_orders::{Actor, Order, OrderStatus};
use bazaar_payments::{
    CalculateCommission, CollectCommission, Commission, CommissionCommand, CommissionStatus,
    CompletePayment, FailPayment, Payment, PaymentCommand, PaymentStatus, RefundCommission,
    RefundPayment,
};
use bazaar_payouts::{Payout, PayoutStatus};

use crate::dispatcher::load;
use crate::errors::{ServiceError, ServiceResult};
use crate::ledger::Ledger;
use crate::notifier::{Notification, NotificationData, NotificationKind, notify_best_effort};
use crate::payouts::cancel_payout;
use crate::provider::{ProviderError, VerificationStatus, with_timeout};
use crate::services::OrderService;
use crate::store::{payment_key, provider_reference_key};

/// A completed payment with its orders and one commission per non-cancelled order.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub payment: Payment,
    pub orders: Vec<Order>,
    pub commissions: Vec<Commission>,
}

#[derive(Debug, Clone)]
pub struct Refund {
    pub payment: Payment,
    pub commissions: Vec<Commission>,
    pub cancelled_payouts: Vec<PayoutId>,
}

/// Payment confirmation, failure and refund, and the commissions they drive.
#[derive(Clone)]
pub struct SettlementService {
    ledger: Arc<Ledger>,
    orders: OrderService,
}

impl SettlementService {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        let orders = OrderService::new(ledger.clone());
        Self { ledger, orders }
    }

    pub async fn payment_by_transaction(&self, transaction_id: &str) -> ServiceResult<Payment> {
        self.ledger
            .stores
            .payments
            .find_by_unique_key(&payment_key(transaction_id))
            .await?
            .ok_or_else(|| DomainError::not_found(format!("payment with transaction {transaction_id}")).into())
    }

    /// Verify the charge with the provider and settle it.
    ///
    /// Calling again for a completed payment creates nothing new and finishes
    /// whatever an earlier call left half done.
    pub async fn confirm_payment(
        &self,
        transaction_id: &str,
        provider_reference: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Settlement> {
        let payment = self.payment_by_transaction(transaction_id).await?;
        let payment = match payment.status() {
            PaymentStatus::Completed => payment,
            PaymentStatus::Pending => self.complete(payment, provider_reference, now).await?,
            other => {
                return Err(DomainError::invalid_transition(other, PaymentStatus::Completed).into());
            }
        };
        self.settle(payment, now).await
    }

    async fn complete(
        &self,
        payment: Payment,
        provider_reference: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Payment> {
        let ledger = &self.ledger;
        let payment_id = payment.id_typed();

        let reference_key = provider_reference_key(provider_reference);
        if let Some(owner) = ledger.stores.payments.find_by_unique_key(&reference_key).await? {
            if owner.id_typed() != payment_id {
                warn!(payment_id = %payment_id, settled = %owner.id_typed(), provider_reference, "charge reference already settled another payment");
                return Err(DomainError::duplicate(format!(
                    "charge {provider_reference} already settled another payment"
                ))
                .into());
            }
        }

        let verification = with_timeout(
            ledger.config.provider_timeout,
            ledger.provider.verify_payment(provider_reference),
        )
        .await
        .inspect_err(|e| warn!(payment_id = %payment_id, error = %e, "payment verification unavailable; payment stays pending"))?;

        match verification.status {
            VerificationStatus::Success => {}
            VerificationStatus::Pending => return Err(ProviderError::NotSettled.into()),
            VerificationStatus::Failed => {
                self.fail_pending(payment, "declined by provider", now).await?;
                return Err(DomainError::validation("payment was declined by the provider").into());
            }
        }

        // Providers that echo the checkout's transaction id must echo ours.
        if let Some(charged_for) = verification.metadata.get("transaction_id").and_then(|v| v.as_str()) {
            if charged_for != payment.transaction_id() {
                warn!(payment_id = %payment_id, charged_for, "charge belongs to another transaction");
                return Err(DomainError::validation("the charge was made for another transaction").into());
            }
        }

        if verification.amount != payment.amount()
            || !verification.currency.eq_ignore_ascii_case(payment.currency())
        {
            warn!(
                payment_id = %payment_id,
                expected = %payment.amount(),
                verified = %verification.amount,
                currency = %verification.currency,
                "verified amount does not match payment"
            );
            self.fail_pending(payment, "verified amount mismatch", now).await?;
            return Err(DomainError::validation("verified amount does not match the payment").into());
        }

        let command = PaymentCommand::CompletePayment(CompletePayment {
            payment_id,
            provider_reference: provider_reference.to_string(),
            verified_amount: verification.amount,
            occurred_at: now,
        });
        let payment = match ledger
            .dispatcher
            .dispatch_on(&*ledger.stores.payments, payment, &command)
            .await
        {
            Ok(payment) => payment,
            Err(ServiceError::Concurrency(msg)) => {
                // A concurrent confirmation got there first.
                let current = load(&*ledger.stores.payments, payment_id.0).await?;
                if current.status() != PaymentStatus::Completed {
                    return Err(ServiceError::Concurrency(msg));
                }
                return Ok(current);
            }
            Err(e) => return Err(e),
        };

        info!(payment_id = %payment_id, transaction_id = %payment.transaction_id(), amount = %payment.amount(), "payment completed");
        if let Some(user_id) = payment.user_id() {
            notify_best_effort(
                &*ledger.notifier,
                user_id,
                Notification {
                    title: "Payment received".to_string(),
                    message: format!("We received your payment of {} {}.", payment.amount(), payment.currency()),
                    kind: NotificationKind::Payment,
                    data: NotificationData::PaymentReceived {
                        payment_id,
                        transaction_id: payment.transaction_id().to_string(),
                        amount: payment.amount(),
                    },
                },
            )
            .await;
        }
        Ok(payment)
    }

    async fn settle(&self, payment: Payment, now: DateTime<Utc>) -> ServiceResult<Settlement> {
        let orders = self.orders.orders_for_payment(payment.id_typed()).await?;

        let mut settled = Vec::with_capacity(orders.len());
        let mut commissions = Vec::with_capacity(orders.len());
        for order in orders {
            if order.status() == OrderStatus::Cancelled {
                settled.push(order);
                continue;
            }

            let order = if order.status() == OrderStatus::Pending && order.kind().is_paid_on_settlement() {
                self.orders
                    .transition(order.id_typed(), OrderStatus::Paid, Actor::System, now)
                    .await?
            } else {
                order
            };

            commissions.push(self.ensure_commission(&payment, &order, now).await?);
            settled.push(order);
        }

        Ok(Settlement {
            payment,
            orders: settled,
            commissions,
        })
    }

    /// The commission of `(payment, order)`, created and collected if needed.
    async fn ensure_commission(
        &self,
        payment: &Payment,
        order: &Order,
        now: DateTime<Utc>,
    ) -> ServiceResult<Commission> {
        let ledger = &self.ledger;
        let store = &*ledger.stores.commissions;
        let key = Commission::key_for(payment.id_typed(), order.id_typed());

        let commission = match store.find_by_unique_key(&key).await? {
            Some(existing) => existing,
            None => {
                let seller_id = order
                    .seller_id()
                    .ok_or_else(|| DomainError::invariant("order without seller"))?;
                let commission_id = CommissionId::generate();
                let command = CommissionCommand::Calculate(CalculateCommission {
                    commission_id,
                    payment_id: payment.id_typed(),
                    order_id: order.id_typed(),
                    seller_id,
                    currency: order.currency().to_string(),
                    total_amount: order.total_amount(),
                    rate: ledger.config.commission_rate,
                    occurred_at: now,
                });
                match ledger
                    .dispatcher
                    .create(store, Commission::empty(commission_id), &command)
                    .await
                {
                    Ok(created) => {
                        info!(
                            commission_id = %commission_id,
                            order_id = %order.id_typed(),
                            commission = %created.commission_amount(),
                            seller_amount = %created.seller_amount(),
                            "commission calculated"
                        );
                        created
                    }
                    Err(e) if e.is_duplicate() => store
                        .find_by_unique_key(&key)
                        .await?
                        .ok_or_else(|| DomainError::not_found(format!("commission {key}")))?,
                    Err(e) => return Err(e),
                }
            }
        };

        if !matches!(commission.status(), CommissionStatus::Pending | CommissionStatus::Calculated) {
            return Ok(commission);
        }

        let commission_id = commission.id_typed();
        let command = CommissionCommand::Collect(CollectCommission {
            commission_id,
            escrow_release_date: now + ledger.config.escrow_hold,
            occurred_at: now,
        });
        match ledger.dispatcher.dispatch_on(store, commission, &command).await {
            Ok(collected) => Ok(collected),
            Err(ServiceError::Concurrency(_)) => load(store, commission_id.0).await,
            Err(e) => Err(e),
        }
    }

    /// Mark a pending payment failed and cancel its pending orders.
    ///
    /// A payment that already failed is returned as is.
    pub async fn fail_payment(
        &self,
        transaction_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Payment> {
        let payment = self.payment_by_transaction(transaction_id).await?;
        match payment.status() {
            PaymentStatus::Failed => Ok(payment),
            PaymentStatus::Pending => self.fail_pending(payment, reason, now).await,
            other => Err(DomainError::invalid_transition(other, PaymentStatus::Failed).into()),
        }
    }

    async fn fail_pending(&self, payment: Payment, reason: &str, now: DateTime<Utc>) -> ServiceResult<Payment> {
        let ledger = &self.ledger;
        let payment_id = payment.id_typed();
        let command = PaymentCommand::FailPayment(FailPayment {
            payment_id,
            reason: reason.to_string(),
            occurred_at: now,
        });
        let payment = ledger
            .dispatcher
            .dispatch_on(&*ledger.stores.payments, payment, &command)
            .await?;
        info!(payment_id = %payment_id, reason, "payment failed");

        for order in self.orders.orders_for_payment(payment_id).await? {
            if order.status() != OrderStatus::Pending {
                continue;
            }
            if let Err(e) = self
                .orders
                .cancel_order(order.id_typed(), Actor::System, now)
                .await
            {
                error!(order_id = %order.id_typed(), error = %e, "could not cancel order of failed payment");
            }
        }

        if let Some(user_id) = payment.user_id() {
            notify_best_effort(
                &*ledger.notifier,
                user_id,
                Notification {
                    title: "Payment failed".to_string(),
                    message: "Your payment could not be completed.".to_string(),
                    kind: NotificationKind::Payment,
                    data: NotificationData::PaymentFailed {
                        payment_id,
                        transaction_id: payment.transaction_id().to_string(),
                    },
                },
            )
            .await;
        }
        Ok(payment)
    }

    /// Refund a completed payment. Admins only.
    ///
    /// Commissions not yet paid out are refunded. A payout still waiting on
    /// one of them is cancelled and its other commissions go back to
    /// `collected`. A payout already in flight blocks the refund.
    pub async fn refund_payment(
        &self,
        transaction_id: &str,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> ServiceResult<Refund> {
        if !matches!(actor, Actor::Admin(_)) {
            return Err(DomainError::unauthorized("only admins can refund payments").into());
        }

        let ledger = &self.ledger;
        let payment = self.payment_by_transaction(transaction_id).await?;
        let payment_id = payment.id_typed();
        if payment.status() != PaymentStatus::Completed {
            return Err(DomainError::invalid_transition(payment.status(), PaymentStatus::Refunded).into());
        }

        let commissions = ledger
            .stores
            .commissions
            .find(&move |c: &Commission| c.payment_id() == Some(payment_id))
            .await?;
        let open_payouts = open_payouts_of(ledger, &commissions).await?;

        let payment = mark_refunded(ledger, payment, &format!("refunded by {actor}"), now).await?;
        let (refunded, cancelled_payouts) =
            refund_commissions(ledger, commissions, open_payouts, "payment refunded", now).await?;

        Ok(Refund {
            payment,
            commissions: refunded,
            cancelled_payouts,
        })
    }

    /// Newest first.
    pub async fn commissions_for_seller(&self, seller_id: UserId) -> ServiceResult<Vec<Commission>> {
        let mut commissions = self
            .ledger
            .stores
            .commissions
            .find(&move |c: &Commission| c.seller_id() == Some(seller_id))
            .await?;
        commissions.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(commissions)
    }
}

/// Move a completed payment to `refunded` and tell the customer.
pub(super) async fn mark_refunded(
    ledger: &Ledger,
    payment: Payment,
    reason: &str,
    now: DateTime<Utc>,
) -> ServiceResult<Payment> {
    let payment_id = payment.id_typed();
    let command = PaymentCommand::RefundPayment(RefundPayment {
        payment_id,
        occurred_at: now,
    });
    let payment = ledger
        .dispatcher
        .dispatch_on(&*ledger.stores.payments, payment, &command)
        .await?;
    info!(payment_id = %payment_id, reason, amount = %payment.amount(), "payment refunded");

    if let Some(user_id) = payment.user_id() {
        notify_best_effort(
            &*ledger.notifier,
            user_id,
            Notification {
                title: "Payment refunded".to_string(),
                message: format!("{} {} has been refunded.", payment.amount(), payment.currency()),
                kind: NotificationKind::Payment,
                data: NotificationData::PaymentRefunded {
                    payment_id,
                    amount: payment.amount(),
                },
            },
        )
        .await;
    }
    Ok(payment)
}

/// Payouts still waiting on one of `commissions`, keyed by id.
///
/// A payout already being transferred cannot be unwound, so it fails the
/// whole operation with `Conflict` before anything is written.
pub(super) async fn open_payouts_of(
    ledger: &Ledger,
    commissions: &[Commission],
) -> ServiceResult<BTreeMap<PayoutId, Payout>> {
    let mut open_payouts = BTreeMap::new();
    for commission in commissions {
        if commission.status() != CommissionStatus::PayoutScheduled {
            continue;
        }
        let Some(payout_id) = commission.payout_id() else {
            continue;
        };
        let payout = load(&*ledger.stores.payouts, payout_id.0).await?;
        match payout.status() {
            PayoutStatus::Processing => {
                return Err(DomainError::conflict(format!(
                    "payout {payout_id} is being transferred; refund later"
                ))
                .into());
            }
            PayoutStatus::Pending | PayoutStatus::Failed => {
                open_payouts.insert(payout_id, payout);
            }
            _ => {}
        }
    }
    Ok(open_payouts)
}

/// Refund every non-terminal commission in `commissions`.
///
/// Each payout in `open_payouts` is cancelled first and hands its other
/// commissions back to `collected`.
pub(super) async fn refund_commissions(
    ledger: &Ledger,
    commissions: Vec<Commission>,
    open_payouts: BTreeMap<PayoutId, Payout>,
    reason: &str,
    now: DateTime<Utc>,
) -> ServiceResult<(Vec<Commission>, Vec<PayoutId>)> {
    let refunded_ids: Vec<CommissionId> = commissions.iter().map(Commission::id_typed).collect();
    let mut cancelled_payouts = Vec::with_capacity(open_payouts.len());
    for (payout_id, payout) in open_payouts {
        cancel_payout(ledger, payout, &refunded_ids, reason, now).await?;
        cancelled_payouts.push(payout_id);
    }

    let mut refunded = Vec::with_capacity(commissions.len());
    for commission in commissions {
        if commission.status().is_terminal() {
            refunded.push(commission);
            continue;
        }
        let commission_id = commission.id_typed();
        let command = CommissionCommand::Refund(RefundCommission {
            commission_id,
            occurred_at: now,
        });
        let commission = ledger
            .dispatcher
            .dispatch_on(&*ledger.stores.commissions, commission, &command)
            .await?;
        info!(commission_id = %commission_id, reason, "commission refunded");
        refunded.push(commission);
    }
    Ok((refunded, cancelled_payouts))
}
