//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. `Money` and
/// `CommissionRate` are the ledger's value objects; two amounts with the same
/// minor units are the same amount.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
