//! Platform commission: the pure calculator and the per-order commission record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{
    Aggregate, AggregateRoot, CommissionId, CommissionRate, DomainError, Money, OrderId, PaymentId,
    PayoutId, UserId,
};
use bazaar_events::Event;

/// Result of splitting a total between platform and seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub commission_amount: Money,
    pub seller_amount: Money,
}

/// `commission = round_half_up(total * rate)`, `seller = total - commission`.
pub fn calculate(total: Money, rate: CommissionRate) -> Split {
    let commission_amount = rate.apply_to(total);
    Split {
        commission_amount,
        // apply_to never exceeds its input.
        seller_amount: Money(total.as_minor() - commission_amount.as_minor()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Calculated,
    Collected,
    PayoutScheduled,
    PayoutCompleted,
    Refunded,
}

impl CommissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommissionStatus::PayoutCompleted | CommissionStatus::Refunded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Calculated => "calculated",
            CommissionStatus::Collected => "collected",
            CommissionStatus::PayoutScheduled => "payout_scheduled",
            CommissionStatus::PayoutCompleted => "payout_completed",
            CommissionStatus::Refunded => "refunded",
        }
    }
}

impl core::fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Held,
    Released,
    Refunded,
}

/// Aggregate root: Commission.
///
/// One per `(payment_id, order_id)`. Invariant:
/// `commission_amount + seller_amount == total_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    id: CommissionId,
    payment_id: Option<PaymentId>,
    order_id: Option<OrderId>,
    seller_id: Option<UserId>,
    currency: String,
    total_amount: Money,
    commission_amount: Money,
    seller_amount: Money,
    commission_rate: CommissionRate,
    status: CommissionStatus,
    escrow_status: EscrowStatus,
    escrow_release_date: Option<DateTime<Utc>>,
    payout_id: Option<PayoutId>,
    version: u64,
    created: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Commission {
    pub fn empty(id: CommissionId) -> Self {
        Self {
            id,
            payment_id: None,
            order_id: None,
            seller_id: None,
            currency: String::new(),
            total_amount: Money::ZERO,
            commission_amount: Money::ZERO,
            seller_amount: Money::ZERO,
            commission_rate: CommissionRate::default(),
            status: CommissionStatus::Pending,
            escrow_status: EscrowStatus::Held,
            escrow_release_date: None,
            payout_id: None,
            version: 0,
            created: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// Uniqueness key shared by every commission of one order in one payment.
    pub fn key_for(payment_id: PaymentId, order_id: OrderId) -> String {
        format!("{payment_id}:{order_id}")
    }

    pub fn unique_key(&self) -> Option<String> {
        Some(Self::key_for(self.payment_id?, self.order_id?))
    }

    pub fn id_typed(&self) -> CommissionId {
        self.id
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment_id
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn seller_id(&self) -> Option<UserId> {
        self.seller_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn commission_amount(&self) -> Money {
        self.commission_amount
    }

    pub fn seller_amount(&self) -> Money {
        self.seller_amount
    }

    pub fn commission_rate(&self) -> CommissionRate {
        self.commission_rate
    }

    pub fn status(&self) -> CommissionStatus {
        self.status
    }

    pub fn escrow_status(&self) -> EscrowStatus {
        self.escrow_status
    }

    pub fn escrow_release_date(&self) -> Option<DateTime<Utc>> {
        self.escrow_release_date
    }

    pub fn payout_id(&self) -> Option<PayoutId> {
        self.payout_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl AggregateRoot for Commission {
    type Id = CommissionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateCommission {
    pub commission_id: CommissionId,
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub seller_id: UserId,
    pub currency: String,
    pub total_amount: Money,
    pub rate: CommissionRate,
    pub occurred_at: DateTime<Utc>,
}

/// Funds captured; escrow held until `escrow_release_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectCommission {
    pub commission_id: CommissionId,
    pub escrow_release_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Claimed by a payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCommissionPayout {
    pub commission_id: CommissionId,
    pub payout_id: PayoutId,
    pub occurred_at: DateTime<Utc>,
}

/// Claim undone (lost race or cancelled payout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCommissionFromPayout {
    pub commission_id: CommissionId,
    pub payout_id: PayoutId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteCommissionPayout {
    pub commission_id: CommissionId,
    pub payout_id: PayoutId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundCommission {
    pub commission_id: CommissionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionCommand {
    Calculate(CalculateCommission),
    Collect(CollectCommission),
    SchedulePayout(ScheduleCommissionPayout),
    ReleaseFromPayout(ReleaseCommissionFromPayout),
    CompletePayout(CompleteCommissionPayout),
    Refund(RefundCommission),
}

impl CommissionCommand {
    fn commission_id(&self) -> CommissionId {
        match self {
            CommissionCommand::Calculate(c) => c.commission_id,
            CommissionCommand::Collect(c) => c.commission_id,
            CommissionCommand::SchedulePayout(c) => c.commission_id,
            CommissionCommand::ReleaseFromPayout(c) => c.commission_id,
            CommissionCommand::CompletePayout(c) => c.commission_id,
            CommissionCommand::Refund(c) => c.commission_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionCalculated {
    pub commission_id: CommissionId,
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub seller_id: UserId,
    pub currency: String,
    pub total_amount: Money,
    pub rate: CommissionRate,
    pub split: Split,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionCollected {
    pub commission_id: CommissionId,
    pub escrow_release_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionPayoutChanged {
    pub commission_id: CommissionId,
    pub payout_id: PayoutId,
    pub seller_id: UserId,
    pub seller_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRefunded {
    pub commission_id: CommissionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommissionEvent {
    Calculated(CommissionCalculated),
    Collected(CommissionCollected),
    PayoutScheduled(CommissionPayoutChanged),
    ReleasedFromPayout(CommissionPayoutChanged),
    PayoutCompleted(CommissionPayoutChanged),
    Refunded(CommissionRefunded),
}

impl Event for CommissionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CommissionEvent::Calculated(_) => "payments.commission.calculated",
            CommissionEvent::Collected(_) => "payments.commission.collected",
            CommissionEvent::PayoutScheduled(_) => "payments.commission.payout_scheduled",
            CommissionEvent::ReleasedFromPayout(_) => "payments.commission.released_from_payout",
            CommissionEvent::PayoutCompleted(_) => "payments.commission.payout_completed",
            CommissionEvent::Refunded(_) => "payments.commission.refunded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CommissionEvent::Calculated(e) => e.occurred_at,
            CommissionEvent::Collected(e) => e.occurred_at,
            CommissionEvent::PayoutScheduled(e)
            | CommissionEvent::ReleasedFromPayout(e)
            | CommissionEvent::PayoutCompleted(e) => e.occurred_at,
            CommissionEvent::Refunded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Commission {
    type Command = CommissionCommand;
    type Event = CommissionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CommissionEvent::Calculated(e) => {
                self.id = e.commission_id;
                self.payment_id = Some(e.payment_id);
                self.order_id = Some(e.order_id);
                self.seller_id = Some(e.seller_id);
                self.currency = e.currency.clone();
                self.total_amount = e.total_amount;
                self.commission_amount = e.split.commission_amount;
                self.seller_amount = e.split.seller_amount;
                self.commission_rate = e.rate;
                self.status = CommissionStatus::Calculated;
                self.escrow_status = EscrowStatus::Held;
                self.created = true;
                self.created_at = Some(e.occurred_at);
            }
            CommissionEvent::Collected(e) => {
                self.status = CommissionStatus::Collected;
                self.escrow_status = EscrowStatus::Held;
                self.escrow_release_date = Some(e.escrow_release_date);
            }
            CommissionEvent::PayoutScheduled(e) => {
                self.status = CommissionStatus::PayoutScheduled;
                self.payout_id = Some(e.payout_id);
            }
            CommissionEvent::ReleasedFromPayout(_) => {
                self.status = CommissionStatus::Collected;
                self.payout_id = None;
            }
            CommissionEvent::PayoutCompleted(_) => {
                self.status = CommissionStatus::PayoutCompleted;
                self.escrow_status = EscrowStatus::Released;
            }
            CommissionEvent::Refunded(_) => {
                self.status = CommissionStatus::Refunded;
                self.escrow_status = EscrowStatus::Refunded;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !matches!(command, CommissionCommand::Calculate(_)) {
            self.ensure_created(command.commission_id())?;
        }

        match command {
            CommissionCommand::Calculate(cmd) => self.handle_calculate(cmd),
            CommissionCommand::Collect(cmd) => self.handle_collect(cmd),
            CommissionCommand::SchedulePayout(cmd) => self.handle_schedule(cmd),
            CommissionCommand::ReleaseFromPayout(cmd) => self.handle_release(cmd),
            CommissionCommand::CompletePayout(cmd) => self.handle_complete(cmd),
            CommissionCommand::Refund(cmd) => self.handle_refund(cmd),
        }
    }
}

impl Commission {
    fn ensure_created(&self, commission_id: CommissionId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("commission {commission_id}")));
        }
        if self.id != commission_id {
            return Err(DomainError::invariant("commission_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(
        &self,
        expected: CommissionStatus,
        to: CommissionStatus,
    ) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_transition(self.status, to));
        }
        Ok(())
    }

    fn ensure_payout(&self, payout_id: PayoutId) -> Result<(), DomainError> {
        if self.payout_id != Some(payout_id) {
            return Err(DomainError::conflict(format!(
                "commission {} is not claimed by payout {payout_id}",
                self.id
            )));
        }
        Ok(())
    }

    fn payout_changed(
        &self,
        payout_id: PayoutId,
        occurred_at: DateTime<Utc>,
    ) -> Result<CommissionPayoutChanged, DomainError> {
        let seller_id = self
            .seller_id
            .ok_or_else(|| DomainError::invariant("commission is missing its seller"))?;
        Ok(CommissionPayoutChanged {
            commission_id: self.id,
            payout_id,
            seller_id,
            seller_amount: self.seller_amount,
            occurred_at,
        })
    }

    fn handle_calculate(
        &self,
        cmd: &CalculateCommission,
    ) -> Result<Vec<CommissionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::duplicate(format!(
                "commission for {}",
                Self::key_for(cmd.payment_id, cmd.order_id)
            )));
        }

        Ok(vec![CommissionEvent::Calculated(CommissionCalculated {
            commission_id: cmd.commission_id,
            payment_id: cmd.payment_id,
            order_id: cmd.order_id,
            seller_id: cmd.seller_id,
            currency: cmd.currency.clone(),
            total_amount: cmd.total_amount,
            rate: cmd.rate,
            split: calculate(cmd.total_amount, cmd.rate),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_collect(&self, cmd: &CollectCommission) -> Result<Vec<CommissionEvent>, DomainError> {
        if !matches!(
            self.status,
            CommissionStatus::Pending | CommissionStatus::Calculated
        ) {
            return Err(DomainError::invalid_transition(
                self.status,
                CommissionStatus::Collected,
            ));
        }

        Ok(vec![CommissionEvent::Collected(CommissionCollected {
            commission_id: self.id,
            escrow_release_date: cmd.escrow_release_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_schedule(
        &self,
        cmd: &ScheduleCommissionPayout,
    ) -> Result<Vec<CommissionEvent>, DomainError> {
        self.ensure_status(CommissionStatus::Collected, CommissionStatus::PayoutScheduled)?;
        if self.escrow_status != EscrowStatus::Held {
            return Err(DomainError::conflict("escrow is no longer held"));
        }

        Ok(vec![CommissionEvent::PayoutScheduled(
            self.payout_changed(cmd.payout_id, cmd.occurred_at)?,
        )])
    }

    fn handle_release(
        &self,
        cmd: &ReleaseCommissionFromPayout,
    ) -> Result<Vec<CommissionEvent>, DomainError> {
        self.ensure_status(CommissionStatus::PayoutScheduled, CommissionStatus::Collected)?;
        self.ensure_payout(cmd.payout_id)?;

        Ok(vec![CommissionEvent::ReleasedFromPayout(
            self.payout_changed(cmd.payout_id, cmd.occurred_at)?,
        )])
    }

    fn handle_complete(
        &self,
        cmd: &CompleteCommissionPayout,
    ) -> Result<Vec<CommissionEvent>, DomainError> {
        self.ensure_status(
            CommissionStatus::PayoutScheduled,
            CommissionStatus::PayoutCompleted,
        )?;
        self.ensure_payout(cmd.payout_id)?;

        Ok(vec![CommissionEvent::PayoutCompleted(
            self.payout_changed(cmd.payout_id, cmd.occurred_at)?,
        )])
    }

    fn handle_refund(&self, cmd: &RefundCommission) -> Result<Vec<CommissionEvent>, DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(
                self.status,
                CommissionStatus::Refunded,
            ));
        }

        Ok(vec![CommissionEvent::Refunded(CommissionRefunded {
            commission_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_events::execute;
    use chrono::Duration;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn rate(bps: u32) -> CommissionRate {
        CommissionRate::from_bps(bps).unwrap()
    }

    fn test_commission(total: u64) -> Commission {
        let id = CommissionId::generate();
        let mut commission = Commission::empty(id);
        execute(
            &mut commission,
            &CommissionCommand::Calculate(CalculateCommission {
                commission_id: id,
                payment_id: PaymentId::generate(),
                order_id: OrderId::generate(),
                seller_id: UserId::new(),
                currency: "NGN".to_string(),
                total_amount: Money(total),
                rate: CommissionRate::default(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        commission
    }

    fn collect(commission: &mut Commission) {
        execute(
            commission,
            &CommissionCommand::Collect(CollectCommission {
                commission_id: commission.id_typed(),
                escrow_release_date: test_time() + Duration::days(7),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
    }

    fn schedule(commission: &Commission, payout_id: PayoutId) -> CommissionCommand {
        CommissionCommand::SchedulePayout(ScheduleCommissionPayout {
            commission_id: commission.id_typed(),
            payout_id,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn ten_percent_of_one_hundred() {
        let split = calculate(Money(10_000), CommissionRate::default());
        assert_eq!(split.commission_amount, Money(1_000));
        assert_eq!(split.seller_amount, Money(9_000));
    }

    #[test]
    fn half_cent_rounds_up() {
        // 12.5% of 0.04 = 0.005
        let split = calculate(Money(4), rate(1_250));
        assert_eq!(split.commission_amount, Money(1));
        assert_eq!(split.seller_amount, Money(3));
    }

    #[test]
    fn zero_and_full_rates() {
        assert_eq!(calculate(Money(777), rate(0)).seller_amount, Money(777));
        assert_eq!(calculate(Money(777), rate(10_000)).commission_amount, Money(777));
    }

    #[test]
    fn lifecycle_moves_forward_through_payout() {
        let mut commission = test_commission(10_000);
        assert_eq!(commission.status(), CommissionStatus::Calculated);
        assert_eq!(commission.seller_amount(), Money(9_000));

        collect(&mut commission);
        assert_eq!(commission.status(), CommissionStatus::Collected);
        assert_eq!(commission.escrow_status(), EscrowStatus::Held);

        let payout_id = PayoutId::generate();
        ({ let cmd = schedule(&commission, payout_id); execute(&mut commission, &cmd) }).unwrap();
        assert_eq!(commission.payout_id(), Some(payout_id));

        let commission_id = commission.id_typed();
        execute(
            &mut commission,
            &CommissionCommand::CompletePayout(CompleteCommissionPayout {
                commission_id,
                payout_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(commission.status(), CommissionStatus::PayoutCompleted);
        assert_eq!(commission.escrow_status(), EscrowStatus::Released);

        let err = commission
            .handle(&CommissionCommand::Refund(RefundCommission {
                commission_id: commission.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn calculated_commission_cannot_be_scheduled() {
        let commission = test_commission(10_000);
        let err = commission
            .handle(&schedule(&commission, PayoutId::generate()))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn release_requires_the_claiming_payout() {
        let mut commission = test_commission(10_000);
        collect(&mut commission);
        ({ let cmd = schedule(&commission, PayoutId::generate()); execute(&mut commission, &cmd) }).unwrap();

        let err = commission
            .handle(&CommissionCommand::ReleaseFromPayout(ReleaseCommissionFromPayout {
                commission_id: commission.id_typed(),
                payout_id: PayoutId::generate(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn second_calculation_is_duplicate() {
        let commission = test_commission(10_000);
        let err = commission
            .handle(&CommissionCommand::Calculate(CalculateCommission {
                commission_id: commission.id_typed(),
                payment_id: commission.payment_id().unwrap(),
                order_id: commission.order_id().unwrap(),
                seller_id: UserId::new(),
                currency: "NGN".to_string(),
                total_amount: Money(10_000),
                rate: CommissionRate::default(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Duplicate(_)));
    }

    proptest! {
        #[test]
        fn split_is_exact_and_rounded_half_up(total in 0u64..1_000_000_000_000u64, bps in 0u32..=10_000u32) {
            let split = calculate(Money(total), rate(bps));

            prop_assert_eq!(
                split.commission_amount.as_minor() + split.seller_amount.as_minor(),
                total
            );

            // round_half_up(total * bps / 10_000) in exact integer arithmetic.
            let exact = u128::from(total) * u128::from(bps);
            let floor = exact / 10_000;
            let rem = exact % 10_000;
            let expected = if rem >= 5_000 { floor + 1 } else { floor };
            prop_assert_eq!(u128::from(split.commission_amount.as_minor()), expected);
        }
    }
}
