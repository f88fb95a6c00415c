//! Payouts domain: the payout aggregate and per-seller batching rules.

pub mod batch;
pub mod payout;

pub use batch::{Grouping, RejectedGroup, SellerBatch, group_eligible, is_eligible};
pub use payout::{
    CancelPayout, CompleteTransfer, FailTransfer, Payout, PayoutCommand, PayoutEvent,
    PayoutStatus, ReschedulePayout, SchedulePayout, ScheduledCommission, StartProcessing,
};
