//! Read models built from the ledger event bus.
//!
//! Projections are rebuildable from the event stream and idempotent under
//! at-least-once delivery (per-aggregate sequence cursors).

pub mod seller_stats;

pub use seller_stats::{SellerStats, SellerStatsError, SellerStatsProjection};
