use thiserror::Error;

use bazaar_core::DomainError;

use crate::provider::ProviderError;
use crate::store::StoreError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error returned by ledger services.
///
/// Domain failures pass through untouched. A store `Duplicate` is lifted into
/// `DomainError::Duplicate` so callers can treat it as "already exists".
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("store failure: {0}")]
    Store(StoreError),

    /// The provider failed or timed out; the operation kept its last durable state.
    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),

    /// A compare-and-swap kept losing.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate { collection, key } => {
                ServiceError::Domain(DomainError::duplicate(format!("{collection} {key}")))
            }
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ServiceError::Domain(DomainError::Duplicate(_)))
    }

    /// Worth trying again later without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Provider(_) | ServiceError::Concurrency(_))
    }
}
