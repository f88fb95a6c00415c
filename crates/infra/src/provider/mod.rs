//! Payment provider boundary: charge verification and seller transfers.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bazaar_core::{Money, PayoutId, UserId};

mod sandbox;

pub use sandbox::{SandboxPaymentProvider, TransferOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Success,
    Failed,
    /// The charge has not settled yet.
    Pending,
}

/// Provider's view of a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub status: VerificationStatus,
    pub amount: Money,
    pub currency: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Idempotency key: resubmitting the same payout never pays twice.
    pub payout_id: PayoutId,
    pub seller_id: UserId,
    pub amount: Money,
    pub currency: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Charge exists but has not settled.
    #[error("charge not settled yet")]
    NotSettled,
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout(_))
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn verify_payment(&self, reference: &str) -> Result<Verification, ProviderError>;

    async fn initiate_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, ProviderError>;
}

/// Bound a provider call; an elapsed timer becomes `ProviderError::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ProviderError::Timeout(limit))?
}
