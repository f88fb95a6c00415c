//! `bazaar-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger crates
//! (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{
    AggregateId, CommissionId, ListingId, OrderId, PaymentId, PayoutId, SubscriptionId, UserId,
};
pub use money::{CommissionRate, Money};
pub use value_object::ValueObject;
