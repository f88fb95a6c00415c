use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use bazaar_core::{CommissionId, DomainError, PayoutId, UserId};
use bazaar_payments::{
    Commission, CommissionCommand, CommissionStatus, CompleteCommissionPayout,
    ReleaseCommissionFromPayout, ScheduleCommissionPayout,
};
use bazaar_payouts::{
    CancelPayout, CompleteTransfer, FailTransfer, Payout, PayoutCommand, PayoutStatus,
    ReschedulePayout, SchedulePayout, SellerBatch, StartProcessing, group_eligible, is_eligible,
};

use crate::dispatcher::load;
use crate::errors::{ServiceError, ServiceResult};
use crate::jobs::RetryPolicy;
use crate::ledger::Ledger;
use crate::notifier::{Notification, NotificationData, NotificationKind, notify_best_effort};
use crate::provider::{TransferRequest, with_timeout};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SellerRunError {
    pub seller_id: Option<UserId>,
    pub payout_id: Option<PayoutId>,
    pub message: String,
    /// Provider trouble; the next run picks it up again.
    pub retryable: bool,
}

/// What one batcher run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PayoutRunReport {
    pub created: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Transfers that timed out and stay `processing`.
    pub in_flight: usize,
    pub rescheduled: usize,
    pub skipped_below_threshold: usize,
    pub errors: Vec<SellerRunError>,
}

enum TransferResult {
    Succeeded,
    Failed(String),
    InFlight,
}

/// Turns eligible commissions into seller payouts and drives their transfers.
///
/// Runs are serialized: a second `run` waits for the first to finish.
pub struct PayoutBatcher {
    ledger: Arc<Ledger>,
    retry_policy: RetryPolicy,
    run_lock: Mutex<()>,
}

impl PayoutBatcher {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        let config = &ledger.config;
        let retry_policy = RetryPolicy::exponential(
            config.payout_max_retries,
            config.payout_retry_base,
            config.payout_retry_base.saturating_mul(16),
        );
        Self {
            ledger,
            retry_policy,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// One pass:
    ///
    /// 1. reconcile commissions left behind by a finished or cancelled payout
    /// 2. put failed payouts whose backoff elapsed back to `pending`
    /// 3. submit every `pending` payout and resubmit `processing` ones
    /// 4. batch newly eligible commissions into fresh payouts and submit them
    pub async fn run(&self, now: DateTime<Utc>) -> ServiceResult<PayoutRunReport> {
        let _guard = self.run_lock.lock().await;
        let mut report = PayoutRunReport::default();

        self.reconcile(now, &mut report).await?;
        self.reschedule_failed(now, &mut report).await?;
        self.resubmit_open(now, &mut report).await?;
        self.batch_eligible(now, &mut report).await?;

        info!(
            created = report.created,
            succeeded = report.succeeded,
            failed = report.failed,
            in_flight = report.in_flight,
            rescheduled = report.rescheduled,
            skipped = report.skipped_below_threshold,
            errors = report.errors.len(),
            "payout run finished"
        );
        Ok(report)
    }

    async fn reconcile(&self, now: DateTime<Utc>, report: &mut PayoutRunReport) -> ServiceResult<()> {
        let scheduled = self
            .ledger
            .stores
            .commissions
            .find(&|c: &Commission| c.status() == CommissionStatus::PayoutScheduled)
            .await?;
        let payout_ids: BTreeSet<PayoutId> =
            scheduled.iter().filter_map(Commission::payout_id).collect();

        for payout_id in payout_ids {
            let outcome: ServiceResult<()> = async {
                let payout = load(&*self.ledger.stores.payouts, payout_id.0).await?;
                match payout.status() {
                    PayoutStatus::Success => complete_commissions(&self.ledger, &payout, now).await,
                    PayoutStatus::Cancelled => release_commissions(&self.ledger, &payout, &[], now).await,
                    _ => Ok(()),
                }
            }
            .await;
            if let Err(e) = outcome {
                record_error(report, None, Some(payout_id), &e);
            }
        }
        Ok(())
    }

    async fn reschedule_failed(&self, now: DateTime<Utc>, report: &mut PayoutRunReport) -> ServiceResult<()> {
        let failed = self
            .ledger
            .stores
            .payouts
            .find(&|p: &Payout| p.status() == PayoutStatus::Failed)
            .await?;

        for payout in failed {
            if !self.retry_policy.should_retry(payout.retry_count()) {
                debug!(payout_id = %payout.id_typed(), retries = payout.retry_count(), "payout retries exhausted");
                continue;
            }
            let Some(last) = payout.scheduled_date() else {
                continue;
            };
            if self.retry_policy.next_attempt_at(last, payout.retry_count()) > now {
                continue;
            }

            let payout_id = payout.id_typed();
            let seller_id = payout.seller_id();
            let command = PayoutCommand::ReschedulePayout(ReschedulePayout {
                payout_id,
                max_retries: self.retry_policy.max_attempts,
                scheduled_date: now,
                occurred_at: now,
            });
            match self
                .ledger
                .dispatcher
                .dispatch_on(&*self.ledger.stores.payouts, payout, &command)
                .await
            {
                Ok(_) => {
                    info!(payout_id = %payout_id, "failed payout rescheduled");
                    report.rescheduled += 1;
                }
                Err(e) => record_error(report, seller_id, Some(payout_id), &e),
            }
        }
        Ok(())
    }

    async fn resubmit_open(&self, now: DateTime<Utc>, report: &mut PayoutRunReport) -> ServiceResult<()> {
        let open = self
            .ledger
            .stores
            .payouts
            .find(&|p: &Payout| {
                matches!(p.status(), PayoutStatus::Pending | PayoutStatus::Processing)
            })
            .await?;

        for payout in open {
            self.submit(payout, now, report).await;
        }
        Ok(())
    }

    async fn batch_eligible(&self, now: DateTime<Utc>, report: &mut PayoutRunReport) -> ServiceResult<()> {
        let eligible = self
            .ledger
            .stores
            .commissions
            .find(&move |c: &Commission| is_eligible(c, now))
            .await?;
        let grouping = group_eligible(eligible, now);
        for rejected in grouping.rejected {
            warn!(
                seller_id = %rejected.seller_id,
                currency = %rejected.currency,
                commissions = rejected.commissions,
                error = %rejected.error,
                "seller batch rejected; skipping"
            );
            report.errors.push(SellerRunError {
                seller_id: Some(rejected.seller_id),
                payout_id: None,
                message: rejected.error.to_string(),
                retryable: false,
            });
        }

        let minimum = self.ledger.config.min_payout;
        for batch in grouping.batches {
            if !batch.meets_threshold(minimum) {
                debug!(seller_id = %batch.seller_id, total = %batch.total, minimum = %minimum, "below payout threshold");
                report.skipped_below_threshold += 1;
                continue;
            }

            match self.open_payout(&batch, now).await {
                Ok(payout) => {
                    report.created += 1;
                    self.submit(payout, now, report).await;
                }
                Err(e) => record_error(report, Some(batch.seller_id), None, &e),
            }
        }
        Ok(())
    }

    /// Create a pending payout and claim every commission of the batch.
    ///
    /// All or none: a lost claim releases the claims already made and
    /// cancels the payout.
    async fn open_payout(&self, batch: &SellerBatch, now: DateTime<Utc>) -> ServiceResult<Payout> {
        let ledger = &self.ledger;
        let payout_id = PayoutId::generate();
        let payout = ledger
            .dispatcher
            .create(
                &*ledger.stores.payouts,
                Payout::empty(payout_id),
                &PayoutCommand::SchedulePayout(SchedulePayout {
                    payout_id,
                    seller_id: batch.seller_id,
                    currency: batch.currency.clone(),
                    commissions: batch.scheduled(),
                    scheduled_date: now,
                    occurred_at: now,
                }),
            )
            .await?;

        for commission in &batch.commissions {
            let command = CommissionCommand::SchedulePayout(ScheduleCommissionPayout {
                commission_id: commission.id_typed(),
                payout_id,
                occurred_at: now,
            });
            let claimed = ledger
                .dispatcher
                .dispatch_on(&*ledger.stores.commissions, commission.clone(), &command)
                .await;

            if let Err(e) = claimed {
                warn!(
                    payout_id = %payout_id,
                    commission_id = %commission.id_typed(),
                    error = %e,
                    "commission claim lost; abandoning payout"
                );
                cancel_payout(ledger, payout, &[], "commission claim lost", now).await?;
                return Err(e);
            }
        }

        info!(payout_id = %payout_id, seller_id = %batch.seller_id, amount = %payout.amount(), commissions = batch.commissions.len(), "payout scheduled");
        Ok(payout)
    }

    async fn submit(&self, payout: Payout, now: DateTime<Utc>, report: &mut PayoutRunReport) {
        let payout_id = payout.id_typed();
        let seller_id = payout.seller_id();
        match self.transfer(payout, now).await {
            Ok(TransferResult::Succeeded) => report.succeeded += 1,
            Ok(TransferResult::InFlight) => report.in_flight += 1,
            Ok(TransferResult::Failed(message)) => {
                report.failed += 1;
                report.errors.push(SellerRunError {
                    seller_id,
                    payout_id: Some(payout_id),
                    message,
                    retryable: true,
                });
            }
            Err(e) => record_error(report, seller_id, Some(payout_id), &e),
        }
    }

    /// Mark processing, call the provider, and record the outcome.
    async fn transfer(&self, payout: Payout, now: DateTime<Utc>) -> ServiceResult<TransferResult> {
        let ledger = &self.ledger;
        let payouts = &*ledger.stores.payouts;
        let payout_id = payout.id_typed();

        let payout = if payout.status() == PayoutStatus::Pending {
            let command = PayoutCommand::StartProcessing(StartProcessing {
                payout_id,
                occurred_at: now,
            });
            ledger.dispatcher.dispatch_on(payouts, payout, &command).await?
        } else {
            payout
        };

        let seller_id = payout
            .seller_id()
            .ok_or_else(|| DomainError::invariant("payout without seller"))?;
        let request = TransferRequest {
            payout_id,
            seller_id,
            amount: payout.amount(),
            currency: payout.currency().to_string(),
            reason: format!("marketplace payout {payout_id}"),
        };

        let outcome = with_timeout(
            ledger.config.provider_timeout,
            ledger.provider.initiate_transfer(&request),
        )
        .await;

        match outcome {
            Ok(receipt) => {
                let command = PayoutCommand::CompleteTransfer(CompleteTransfer {
                    payout_id,
                    transfer_id: receipt.transfer_id.clone(),
                    occurred_at: now,
                });
                let payout = ledger.dispatcher.dispatch_on(payouts, payout, &command).await?;
                info!(payout_id = %payout_id, seller_id = %seller_id, amount = %payout.amount(), transfer_id = %receipt.transfer_id, "payout sent");

                complete_commissions(ledger, &payout, now).await?;
                notify_best_effort(
                    &*ledger.notifier,
                    seller_id,
                    Notification {
                        title: "Payout sent".to_string(),
                        message: format!("{} {} is on its way to your account.", payout.amount(), payout.currency()),
                        kind: NotificationKind::Payout,
                        data: NotificationData::PayoutSent {
                            payout_id,
                            amount: payout.amount(),
                            transfer_id: receipt.transfer_id,
                        },
                    },
                )
                .await;
                Ok(TransferResult::Succeeded)
            }
            Err(e) if e.is_timeout() => {
                warn!(payout_id = %payout_id, error = %e, "transfer timed out; payout stays processing");
                Ok(TransferResult::InFlight)
            }
            Err(e) => {
                let message = e.to_string();
                let command = PayoutCommand::FailTransfer(FailTransfer {
                    payout_id,
                    error: message.clone(),
                    occurred_at: now,
                });
                let payout = ledger.dispatcher.dispatch_on(payouts, payout, &command).await?;
                warn!(payout_id = %payout_id, retries = payout.retry_count(), error = %message, "transfer failed");

                notify_best_effort(
                    &*ledger.notifier,
                    seller_id,
                    Notification {
                        title: "Payout failed".to_string(),
                        message: "We could not send your payout. It will be retried.".to_string(),
                        kind: NotificationKind::Payout,
                        data: NotificationData::PayoutFailed {
                            payout_id,
                            amount: payout.amount(),
                        },
                    },
                )
                .await;
                Ok(TransferResult::Failed(message))
            }
        }
    }

    pub async fn payouts_for_seller(&self, seller_id: UserId) -> ServiceResult<Vec<Payout>> {
        let mut payouts = self
            .ledger
            .stores
            .payouts
            .find(&move |p: &Payout| p.seller_id() == Some(seller_id))
            .await?;
        payouts.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(payouts)
    }
}

fn record_error(
    report: &mut PayoutRunReport,
    seller_id: Option<UserId>,
    payout_id: Option<PayoutId>,
    err: &ServiceError,
) {
    error!(seller_id = ?seller_id, payout_id = ?payout_id, error = %err, "payout step failed; skipping");
    report.errors.push(SellerRunError {
        seller_id,
        payout_id,
        message: err.to_string(),
        retryable: err.is_retryable(),
    });
}

/// Move every still-scheduled commission of a successful payout to `payout_completed`.
async fn complete_commissions(ledger: &Ledger, payout: &Payout, now: DateTime<Utc>) -> ServiceResult<()> {
    let payout_id = payout.id_typed();
    for commission_id in payout.commission_ids() {
        let commission = load(&*ledger.stores.commissions, commission_id.0).await?;
        if commission.status() != CommissionStatus::PayoutScheduled
            || commission.payout_id() != Some(payout_id)
        {
            continue;
        }
        let command = CommissionCommand::CompletePayout(CompleteCommissionPayout {
            commission_id: *commission_id,
            payout_id,
            occurred_at: now,
        });
        ledger
            .dispatcher
            .dispatch_on(&*ledger.stores.commissions, commission, &command)
            .await?;
    }
    Ok(())
}

/// Return the commissions claimed by `payout` to `collected`, except `keep`.
async fn release_commissions(
    ledger: &Ledger,
    payout: &Payout,
    keep: &[CommissionId],
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let payout_id = payout.id_typed();
    for commission_id in payout.commission_ids() {
        if keep.contains(commission_id) {
            continue;
        }
        let commission = load(&*ledger.stores.commissions, commission_id.0).await?;
        if commission.status() != CommissionStatus::PayoutScheduled
            || commission.payout_id() != Some(payout_id)
        {
            continue;
        }
        let command = CommissionCommand::ReleaseFromPayout(ReleaseCommissionFromPayout {
            commission_id: *commission_id,
            payout_id,
            occurred_at: now,
        });
        ledger
            .dispatcher
            .dispatch_on(&*ledger.stores.commissions, commission, &command)
            .await?;
    }
    Ok(())
}

/// Cancel a `pending`/`failed` payout and hand its commissions back, except `keep`.
pub(crate) async fn cancel_payout(
    ledger: &Ledger,
    payout: Payout,
    keep: &[CommissionId],
    reason: &str,
    now: DateTime<Utc>,
) -> ServiceResult<Payout> {
    let payout_id = payout.id_typed();
    let command = PayoutCommand::CancelPayout(CancelPayout {
        payout_id,
        reason: reason.to_string(),
        occurred_at: now,
    });
    let payout = ledger
        .dispatcher
        .dispatch_on(&*ledger.stores.payouts, payout, &command)
        .await?;
    info!(payout_id = %payout_id, reason, "payout cancelled");

    release_commissions(ledger, &payout, keep, now).await?;
    Ok(payout)
}
