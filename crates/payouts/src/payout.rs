use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{Aggregate, AggregateRoot, CommissionId, DomainError, Money, PayoutId, UserId};
use bazaar_events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
}

impl PayoutStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Success => "success",
            PayoutStatus::Failed => "failed",
            PayoutStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: Payout.
///
/// Invariant: `amount` equals the sum of the seller amounts of `commission_ids`.
/// A `success` payout is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    id: PayoutId,
    seller_id: Option<UserId>,
    currency: String,
    amount: Money,
    status: PayoutStatus,
    commission_ids: Vec<CommissionId>,
    scheduled_date: Option<DateTime<Utc>>,
    processed_date: Option<DateTime<Utc>>,
    retry_count: u32,
    transfer_id: Option<String>,
    last_error: Option<String>,
    version: u64,
    created: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Payout {
    pub fn empty(id: PayoutId) -> Self {
        Self {
            id,
            seller_id: None,
            currency: String::new(),
            amount: Money::ZERO,
            status: PayoutStatus::Pending,
            commission_ids: Vec::new(),
            scheduled_date: None,
            processed_date: None,
            retry_count: 0,
            transfer_id: None,
            last_error: None,
            version: 0,
            created: false,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn id_typed(&self) -> PayoutId {
        self.id
    }

    pub fn seller_id(&self) -> Option<UserId> {
        self.seller_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> PayoutStatus {
        self.status
    }

    pub fn commission_ids(&self) -> &[CommissionId] {
        &self.commission_ids
    }

    pub fn scheduled_date(&self) -> Option<DateTime<Utc>> {
        self.scheduled_date
    }

    pub fn processed_date(&self) -> Option<DateTime<Utc>> {
        self.processed_date
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn transfer_id(&self) -> Option<&str> {
        self.transfer_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn contains(&self, commission_id: CommissionId) -> bool {
        self.commission_ids.contains(&commission_id)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl AggregateRoot for Payout {
    type Id = PayoutId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A commission entering a payout, with the amount owed to the seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCommission {
    pub commission_id: CommissionId,
    pub seller_amount: Money,
}

/// Command: SchedulePayout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePayout {
    pub payout_id: PayoutId,
    pub seller_id: UserId,
    pub currency: String,
    pub commissions: Vec<ScheduledCommission>,
    pub scheduled_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartProcessing (transfer about to be submitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProcessing {
    pub payout_id: PayoutId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteTransfer {
    pub payout_id: PayoutId,
    pub transfer_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FailTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailTransfer {
    pub payout_id: PayoutId,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReschedulePayout (failed payout goes back to pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReschedulePayout {
    pub payout_id: PayoutId,
    pub max_retries: u32,
    pub scheduled_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPayout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPayout {
    pub payout_id: PayoutId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutCommand {
    SchedulePayout(SchedulePayout),
    StartProcessing(StartProcessing),
    CompleteTransfer(CompleteTransfer),
    FailTransfer(FailTransfer),
    ReschedulePayout(ReschedulePayout),
    CancelPayout(CancelPayout),
}

impl PayoutCommand {
    fn payout_id(&self) -> PayoutId {
        match self {
            PayoutCommand::SchedulePayout(c) => c.payout_id,
            PayoutCommand::StartProcessing(c) => c.payout_id,
            PayoutCommand::CompleteTransfer(c) => c.payout_id,
            PayoutCommand::FailTransfer(c) => c.payout_id,
            PayoutCommand::ReschedulePayout(c) => c.payout_id,
            PayoutCommand::CancelPayout(c) => c.payout_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutScheduled {
    pub payout_id: PayoutId,
    pub seller_id: UserId,
    pub currency: String,
    pub amount: Money,
    pub commission_ids: Vec<CommissionId>,
    pub scheduled_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutProcessingStarted {
    pub payout_id: PayoutId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSucceeded {
    pub payout_id: PayoutId,
    pub seller_id: UserId,
    pub amount: Money,
    pub transfer_id: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutFailed {
    pub payout_id: PayoutId,
    pub error: String,
    pub retry_count: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRescheduled {
    pub payout_id: PayoutId,
    pub scheduled_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutCancelled {
    pub payout_id: PayoutId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayoutEvent {
    Scheduled(PayoutScheduled),
    ProcessingStarted(PayoutProcessingStarted),
    Succeeded(PayoutSucceeded),
    Failed(PayoutFailed),
    Rescheduled(PayoutRescheduled),
    Cancelled(PayoutCancelled),
}

impl Event for PayoutEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PayoutEvent::Scheduled(_) => "payouts.payout.scheduled",
            PayoutEvent::ProcessingStarted(_) => "payouts.payout.processing_started",
            PayoutEvent::Succeeded(_) => "payouts.payout.succeeded",
            PayoutEvent::Failed(_) => "payouts.payout.failed",
            PayoutEvent::Rescheduled(_) => "payouts.payout.rescheduled",
            PayoutEvent::Cancelled(_) => "payouts.payout.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PayoutEvent::Scheduled(e) => e.occurred_at,
            PayoutEvent::ProcessingStarted(e) => e.occurred_at,
            PayoutEvent::Succeeded(e) => e.occurred_at,
            PayoutEvent::Failed(e) => e.occurred_at,
            PayoutEvent::Rescheduled(e) => e.occurred_at,
            PayoutEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Payout {
    type Command = PayoutCommand;
    type Event = PayoutEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PayoutEvent::Scheduled(e) => {
                self.id = e.payout_id;
                self.seller_id = Some(e.seller_id);
                self.currency = e.currency.clone();
                self.amount = e.amount;
                self.commission_ids = e.commission_ids.clone();
                self.scheduled_date = Some(e.scheduled_date);
                self.status = PayoutStatus::Pending;
                self.created = true;
                self.created_at = Some(e.occurred_at);
            }
            PayoutEvent::ProcessingStarted(_) => {
                self.status = PayoutStatus::Processing;
            }
            PayoutEvent::Succeeded(e) => {
                self.status = PayoutStatus::Success;
                self.transfer_id = Some(e.transfer_id.clone());
                self.processed_date = Some(e.occurred_at);
                self.last_error = None;
            }
            PayoutEvent::Failed(e) => {
                self.status = PayoutStatus::Failed;
                self.retry_count = e.retry_count;
                self.last_error = Some(e.error.clone());
            }
            PayoutEvent::Rescheduled(e) => {
                self.status = PayoutStatus::Pending;
                self.scheduled_date = Some(e.scheduled_date);
            }
            PayoutEvent::Cancelled(e) => {
                self.status = PayoutStatus::Cancelled;
                self.last_error = Some(e.reason.clone());
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !matches!(command, PayoutCommand::SchedulePayout(_)) {
            self.ensure_created(command.payout_id())?;
        }

        match command {
            PayoutCommand::SchedulePayout(cmd) => self.handle_schedule(cmd),
            PayoutCommand::StartProcessing(cmd) => {
                self.ensure_status(&[PayoutStatus::Pending], PayoutStatus::Processing)?;
                Ok(vec![PayoutEvent::ProcessingStarted(PayoutProcessingStarted {
                    payout_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PayoutCommand::CompleteTransfer(cmd) => {
                self.ensure_status(&[PayoutStatus::Processing], PayoutStatus::Success)?;
                if cmd.transfer_id.trim().is_empty() {
                    return Err(DomainError::validation("transfer_id cannot be empty"));
                }
                let seller_id = self
                    .seller_id
                    .ok_or_else(|| DomainError::invariant("payout is missing its seller"))?;
                Ok(vec![PayoutEvent::Succeeded(PayoutSucceeded {
                    payout_id: self.id,
                    seller_id,
                    amount: self.amount,
                    transfer_id: cmd.transfer_id.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            PayoutCommand::FailTransfer(cmd) => {
                self.ensure_status(&[PayoutStatus::Processing], PayoutStatus::Failed)?;
                Ok(vec![PayoutEvent::Failed(PayoutFailed {
                    payout_id: self.id,
                    error: cmd.error.clone(),
                    retry_count: self.retry_count.saturating_add(1),
                    occurred_at: cmd.occurred_at,
                })])
            }
            PayoutCommand::ReschedulePayout(cmd) => {
                self.ensure_status(&[PayoutStatus::Failed], PayoutStatus::Pending)?;
                if self.retry_count >= cmd.max_retries {
                    return Err(DomainError::conflict(format!(
                        "payout {} exhausted its {} retries",
                        self.id, cmd.max_retries
                    )));
                }
                Ok(vec![PayoutEvent::Rescheduled(PayoutRescheduled {
                    payout_id: self.id,
                    scheduled_date: cmd.scheduled_date,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PayoutCommand::CancelPayout(cmd) => {
                self.ensure_status(
                    &[PayoutStatus::Pending, PayoutStatus::Failed],
                    PayoutStatus::Cancelled,
                )?;
                Ok(vec![PayoutEvent::Cancelled(PayoutCancelled {
                    payout_id: self.id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Payout {
    fn ensure_created(&self, payout_id: PayoutId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("payout {payout_id}")));
        }
        if self.id != payout_id {
            return Err(DomainError::invariant("payout_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, allowed: &[PayoutStatus], to: PayoutStatus) -> Result<(), DomainError> {
        if !allowed.contains(&self.status) {
            return Err(DomainError::invalid_transition(self.status, to));
        }
        Ok(())
    }

    fn handle_schedule(&self, cmd: &SchedulePayout) -> Result<Vec<PayoutEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("payout already exists"));
        }
        if cmd.commissions.is_empty() {
            return Err(DomainError::validation("payout requires at least one commission"));
        }

        let mut commission_ids: Vec<CommissionId> = Vec::with_capacity(cmd.commissions.len());
        for c in &cmd.commissions {
            if commission_ids.contains(&c.commission_id) {
                return Err(DomainError::validation(format!(
                    "commission {} listed twice",
                    c.commission_id
                )));
            }
            commission_ids.push(c.commission_id);
        }
        let amount = Money::sum(cmd.commissions.iter().map(|c| c.seller_amount))?;

        Ok(vec![PayoutEvent::Scheduled(PayoutScheduled {
            payout_id: cmd.payout_id,
            seller_id: cmd.seller_id,
            currency: cmd.currency.clone(),
            amount,
            commission_ids,
            scheduled_date: cmd.scheduled_date,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn scheduled(amounts: &[u64]) -> Payout {
        let id = PayoutId::generate();
        let mut payout = Payout::empty(id);
        execute(
            &mut payout,
            &PayoutCommand::SchedulePayout(SchedulePayout {
                payout_id: id,
                seller_id: UserId::new(),
                currency: "NGN".to_string(),
                commissions: amounts
                    .iter()
                    .map(|a| ScheduledCommission {
                        commission_id: CommissionId::generate(),
                        seller_amount: Money(*a),
                    })
                    .collect(),
                scheduled_date: test_time(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        payout
    }

    fn start(payout: &Payout) -> PayoutCommand {
        PayoutCommand::StartProcessing(StartProcessing {
            payout_id: payout.id_typed(),
            occurred_at: test_time(),
        })
    }

    fn fail(payout: &Payout) -> PayoutCommand {
        PayoutCommand::FailTransfer(FailTransfer {
            payout_id: payout.id_typed(),
            error: "bank unavailable".to_string(),
            occurred_at: test_time(),
        })
    }

    fn reschedule(payout: &Payout, max_retries: u32) -> PayoutCommand {
        PayoutCommand::ReschedulePayout(ReschedulePayout {
            payout_id: payout.id_typed(),
            max_retries,
            scheduled_date: test_time(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn amount_is_sum_of_seller_amounts() {
        let payout = scheduled(&[9_000, 4_500, 1]);
        assert_eq!(payout.amount(), Money(13_501));
        assert_eq!(payout.commission_ids().len(), 3);
        assert_eq!(payout.status(), PayoutStatus::Pending);
    }

    #[test]
    fn success_records_transfer_and_is_final() {
        let mut payout = scheduled(&[9_000]);
        ({ let cmd = start(&payout); execute(&mut payout, &cmd) }).unwrap();
        let payout_id = payout.id_typed();
        execute(
            &mut payout,
            &PayoutCommand::CompleteTransfer(CompleteTransfer {
                payout_id,
                transfer_id: "trf_1".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(payout.status(), PayoutStatus::Success);
        assert_eq!(payout.transfer_id(), Some("trf_1"));
        assert!(payout.processed_date().is_some());

        for cmd in [start(&payout), fail(&payout), reschedule(&payout, 3)] {
            let err = payout.handle(&cmd).unwrap_err();
            assert!(matches!(err, DomainError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn failure_counts_retries_until_exhausted() {
        let mut payout = scheduled(&[9_000]);

        for attempt in 1..=2 {
            ({ let cmd = start(&payout); execute(&mut payout, &cmd) }).unwrap();
            ({ let cmd = fail(&payout); execute(&mut payout, &cmd) }).unwrap();
            assert_eq!(payout.retry_count(), attempt);
            assert_eq!(payout.last_error(), Some("bank unavailable"));
            ({ let cmd = reschedule(&payout, 3); execute(&mut payout, &cmd) }).unwrap();
        }

        ({ let cmd = start(&payout); execute(&mut payout, &cmd) }).unwrap();
        ({ let cmd = fail(&payout); execute(&mut payout, &cmd) }).unwrap();
        let err = payout.handle(&reschedule(&payout, 3)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn processing_payout_cannot_be_cancelled() {
        let mut payout = scheduled(&[9_000]);
        ({ let cmd = start(&payout); execute(&mut payout, &cmd) }).unwrap();

        let err = payout
            .handle(&PayoutCommand::CancelPayout(CancelPayout {
                payout_id: payout.id_typed(),
                reason: "refund".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn empty_payout_is_rejected() {
        let payout = Payout::empty(PayoutId::generate());
        let err = payout
            .handle(&PayoutCommand::SchedulePayout(SchedulePayout {
                payout_id: payout.id_typed(),
                seller_id: UserId::new(),
                currency: "NGN".to_string(),
                commissions: vec![],
                scheduled_date: test_time(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
