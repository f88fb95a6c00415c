use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use bazaar_core::{Money, PayoutId};

use super::{
    PaymentProvider, ProviderError, TransferReceipt, TransferRequest, Verification,
    VerificationStatus,
};

/// Scripted result of the next transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeed,
    Fail(String),
    /// Never answers; the caller's timeout fires.
    Hang,
}

enum NextTransfer {
    Replay(TransferReceipt),
    Run(TransferOutcome),
}

#[derive(Debug, Default)]
struct SandboxState {
    charges: HashMap<String, Verification>,
    unavailable: bool,
    script: VecDeque<TransferOutcome>,
    completed: HashMap<PayoutId, TransferReceipt>,
    submitted: Vec<TransferRequest>,
}

/// In-memory provider for development and tests.
///
/// Charges are registered up front; transfers succeed unless scripted
/// otherwise. A payout id that already succeeded returns its first receipt.
#[derive(Debug, Default)]
pub struct SandboxPaymentProvider {
    state: Mutex<SandboxState>,
}

impl SandboxPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SandboxState) -> T) -> Result<T, ProviderError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ProviderError::Unavailable("sandbox lock poisoned".to_string()))?;
        Ok(f(&mut state))
    }

    /// Register a settled charge under `reference`.
    pub fn record_charge(&self, reference: &str, amount: Money, currency: &str) {
        self.set_charge(reference, VerificationStatus::Success, amount, currency);
    }

    /// Like `record_charge`, echoing `transaction_id` in the verification metadata.
    pub fn record_charge_for(&self, reference: &str, transaction_id: &str, amount: Money, currency: &str) {
        let mut metadata = serde_json::Map::new();
        metadata.insert("transaction_id".to_string(), serde_json::Value::from(transaction_id));
        let verification = Verification {
            status: VerificationStatus::Success,
            amount,
            currency: currency.to_string(),
            metadata,
        };
        let _ = self.with_state(|s| s.charges.insert(reference.to_string(), verification));
    }

    pub fn decline_charge(&self, reference: &str, amount: Money, currency: &str) {
        self.set_charge(reference, VerificationStatus::Failed, amount, currency);
    }

    pub fn hold_charge(&self, reference: &str, amount: Money, currency: &str) {
        self.set_charge(reference, VerificationStatus::Pending, amount, currency);
    }

    fn set_charge(&self, reference: &str, status: VerificationStatus, amount: Money, currency: &str) {
        let verification = Verification {
            status,
            amount,
            currency: currency.to_string(),
            metadata: serde_json::Map::new(),
        };
        let _ = self.with_state(|s| s.charges.insert(reference.to_string(), verification));
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        let _ = self.with_state(|s| s.unavailable = unavailable);
    }

    /// Queue outcomes for the next transfer attempts, oldest first.
    pub fn script_transfers<I: IntoIterator<Item = TransferOutcome>>(&self, outcomes: I) {
        let _ = self.with_state(|s| s.script.extend(outcomes));
    }

    /// Every transfer request received, including retries.
    pub fn submitted_transfers(&self) -> Vec<TransferRequest> {
        self.with_state(|s| s.submitted.clone()).unwrap_or_default()
    }

    /// Transfers that actually moved money, one per payout.
    pub fn completed_transfers(&self) -> usize {
        self.with_state(|s| s.completed.len()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProvider for SandboxPaymentProvider {
    async fn verify_payment(&self, reference: &str) -> Result<Verification, ProviderError> {
        let found = self.with_state(|s| {
            if s.unavailable {
                return Err(ProviderError::Unavailable("sandbox offline".to_string()));
            }
            Ok(s.charges.get(reference).cloned())
        })??;

        found.ok_or_else(|| ProviderError::Rejected(format!("unknown reference {reference}")))
    }

    async fn initiate_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, ProviderError> {
        let next = self.with_state(|s| {
            s.submitted.push(request.clone());
            if s.unavailable {
                return Err(ProviderError::Unavailable("sandbox offline".to_string()));
            }
            Ok(match s.completed.get(&request.payout_id) {
                Some(receipt) => NextTransfer::Replay(receipt.clone()),
                None => NextTransfer::Run(s.script.pop_front().unwrap_or(TransferOutcome::Succeed)),
            })
        })??;

        let outcome = match next {
            NextTransfer::Run(outcome) => outcome,
            NextTransfer::Replay(receipt) => {
                debug!(payout_id = %request.payout_id, "transfer replayed; returning first receipt");
                return Ok(receipt);
            }
        };

        match outcome {
            TransferOutcome::Succeed => {
                let receipt = TransferReceipt {
                    transfer_id: format!("trf_{}", Uuid::now_v7().simple()),
                };
                self.with_state(|s| s.completed.insert(request.payout_id, receipt.clone()))?;
                Ok(receipt)
            }
            TransferOutcome::Fail(reason) => Err(ProviderError::Rejected(reason)),
            TransferOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(ProviderError::Unavailable("sandbox hang elapsed".to_string()))
            }
        }
    }
}
