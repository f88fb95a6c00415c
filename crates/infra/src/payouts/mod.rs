//! Seller payouts: batching eligible commissions and driving transfers.

mod batcher;

pub(crate) use batcher::cancel_payout;
pub use batcher::{PayoutBatcher, PayoutRunReport, SellerRunError};
