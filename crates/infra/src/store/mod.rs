//! Document persistence for ledger records.
//!
//! Every aggregate is stored whole, keyed by its id and guarded by its
//! version. There are no multi-record transactions: services combine
//! `conditional_update` (compare-and-swap on the version) with unique keys to
//! keep the ledger consistent.

mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod record;

pub use in_memory::InMemoryRecordStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresRecordStore;
pub use record::{
    Record, RecordFilter, RecordStore, StoreError, payment_key, provider_reference_key,
    subscription_key,
};
