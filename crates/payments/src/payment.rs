use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{Aggregate, AggregateRoot, DomainError, Money, PaymentId, UserId};
use bazaar_events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Wallet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

/// Aggregate root: Payment.
///
/// `transaction_id` is the idempotency key shared with the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    user_id: Option<UserId>,
    amount: Money,
    currency: String,
    method: PaymentMethod,
    status: PaymentStatus,
    transaction_id: String,
    provider_reference: Option<String>,
    failure_reason: Option<String>,
    version: u64,
    created: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn empty(id: PaymentId) -> Self {
        Self {
            id,
            user_id: None,
            amount: Money::ZERO,
            currency: String::new(),
            method: PaymentMethod::Card,
            status: PaymentStatus::Pending,
            transaction_id: String::new(),
            provider_reference: None,
            failure_reason: None,
            version: 0,
            created: false,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn id_typed(&self) -> PaymentId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn provider_reference(&self) -> Option<&str> {
        self.provider_reference.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
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

impl AggregateRoot for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: InitiatePayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePayment {
    pub payment_id: PaymentId,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompletePayment (provider verified the charge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletePayment {
    pub payment_id: PaymentId,
    pub provider_reference: String,
    pub verified_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FailPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailPayment {
    pub payment_id: PaymentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RefundPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPayment {
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentCommand {
    InitiatePayment(InitiatePayment),
    CompletePayment(CompletePayment),
    FailPayment(FailPayment),
    RefundPayment(RefundPayment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiated {
    pub payment_id: PaymentId,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub payment_id: PaymentId,
    pub provider_reference: String,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub payment_id: PaymentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub payment_id: PaymentId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    PaymentInitiated(PaymentInitiated),
    PaymentCompleted(PaymentCompleted),
    PaymentFailed(PaymentFailed),
    PaymentRefunded(PaymentRefunded),
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentInitiated(_) => "payments.payment.initiated",
            PaymentEvent::PaymentCompleted(_) => "payments.payment.completed",
            PaymentEvent::PaymentFailed(_) => "payments.payment.failed",
            PaymentEvent::PaymentRefunded(_) => "payments.payment.refunded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::PaymentInitiated(e) => e.occurred_at,
            PaymentEvent::PaymentCompleted(e) => e.occurred_at,
            PaymentEvent::PaymentFailed(e) => e.occurred_at,
            PaymentEvent::PaymentRefunded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Payment {
    type Command = PaymentCommand;
    type Event = PaymentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PaymentEvent::PaymentInitiated(e) => {
                self.id = e.payment_id;
                self.user_id = Some(e.user_id);
                self.amount = e.amount;
                self.currency = e.currency.clone();
                self.method = e.method;
                self.transaction_id = e.transaction_id.clone();
                self.status = PaymentStatus::Pending;
                self.created = true;
                self.created_at = Some(e.occurred_at);
            }
            PaymentEvent::PaymentCompleted(e) => {
                self.status = PaymentStatus::Completed;
                self.provider_reference = Some(e.provider_reference.clone());
            }
            PaymentEvent::PaymentFailed(e) => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(e.reason.clone());
            }
            PaymentEvent::PaymentRefunded(_) => {
                self.status = PaymentStatus::Refunded;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PaymentCommand::InitiatePayment(cmd) => self.handle_initiate(cmd),
            PaymentCommand::CompletePayment(cmd) => self.handle_complete(cmd),
            PaymentCommand::FailPayment(cmd) => self.handle_fail(cmd),
            PaymentCommand::RefundPayment(cmd) => self.handle_refund(cmd),
        }
    }
}

impl Payment {
    fn ensure_created(&self, payment_id: PaymentId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("payment {payment_id}")));
        }
        if self.id != payment_id {
            return Err(DomainError::invariant("payment_id mismatch"));
        }
        Ok(())
    }

    fn ensure_pending(&self, to: PaymentStatus) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Pending {
            return Err(DomainError::invalid_transition(self.status, to));
        }
        Ok(())
    }

    fn handle_initiate(&self, cmd: &InitiatePayment) -> Result<Vec<PaymentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("payment already exists"));
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if cmd.transaction_id.trim().is_empty() {
            return Err(DomainError::validation("transaction_id cannot be empty"));
        }

        Ok(vec![PaymentEvent::PaymentInitiated(PaymentInitiated {
            payment_id: cmd.payment_id,
            user_id: cmd.user_id,
            amount: cmd.amount,
            currency: cmd.currency.clone(),
            method: cmd.method,
            transaction_id: cmd.transaction_id.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompletePayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_created(cmd.payment_id)?;
        self.ensure_pending(PaymentStatus::Completed)?;

        if cmd.verified_amount != self.amount {
            return Err(DomainError::validation(format!(
                "verified amount {} does not match payment amount {}",
                cmd.verified_amount, self.amount
            )));
        }

        Ok(vec![PaymentEvent::PaymentCompleted(PaymentCompleted {
            payment_id: self.id,
            provider_reference: cmd.provider_reference.clone(),
            amount: self.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fail(&self, cmd: &FailPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_created(cmd.payment_id)?;
        self.ensure_pending(PaymentStatus::Failed)?;

        Ok(vec![PaymentEvent::PaymentFailed(PaymentFailed {
            payment_id: self.id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RefundPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        self.ensure_created(cmd.payment_id)?;

        if self.status != PaymentStatus::Completed {
            return Err(DomainError::invalid_transition(
                self.status,
                PaymentStatus::Refunded,
            ));
        }

        Ok(vec![PaymentEvent::PaymentRefunded(PaymentRefunded {
            payment_id: self.id,
            amount: self.amount,
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

    fn test_payment(amount: u64) -> Payment {
        let id = PaymentId::generate();
        let mut payment = Payment::empty(id);
        execute(
            &mut payment,
            &PaymentCommand::InitiatePayment(InitiatePayment {
                payment_id: id,
                user_id: UserId::new(),
                amount: Money(amount),
                currency: "NGN".to_string(),
                method: PaymentMethod::Card,
                transaction_id: "txn-001".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        payment
    }

    fn complete(payment: &Payment, verified: u64) -> PaymentCommand {
        PaymentCommand::CompletePayment(CompletePayment {
            payment_id: payment.id_typed(),
            provider_reference: "ref-1".to_string(),
            verified_amount: Money(verified),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn complete_records_reference() {
        let mut payment = test_payment(10_000);
        ({ let cmd = complete(&payment, 10_000); execute(&mut payment, &cmd) }).unwrap();

        assert_eq!(payment.status(), PaymentStatus::Completed);
        assert_eq!(payment.provider_reference(), Some("ref-1"));
    }

    #[test]
    fn amount_mismatch_is_validation_error() {
        let payment = test_payment(10_000);
        let err = payment.handle(&complete(&payment, 9_999)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn completed_payment_cannot_fail_but_can_refund() {
        let mut payment = test_payment(10_000);
        ({ let cmd = complete(&payment, 10_000); execute(&mut payment, &cmd) }).unwrap();

        let err = payment
            .handle(&PaymentCommand::FailPayment(FailPayment {
                payment_id: payment.id_typed(),
                reason: "late decline".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        let payment_id = payment.id_typed();
        execute(
            &mut payment,
            &PaymentCommand::RefundPayment(RefundPayment {
                payment_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(payment.status(), PaymentStatus::Refunded);
    }

    #[test]
    fn pending_payment_cannot_be_refunded() {
        let payment = test_payment(10_000);
        let err = payment
            .handle(&PaymentCommand::RefundPayment(RefundPayment {
                payment_id: payment.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }
}
