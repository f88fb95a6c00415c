//! Background work: the payout scheduler and its retry policy.

pub mod retry;
pub mod scheduler;

pub use retry::{BackoffStrategy, RetryPolicy};
pub use scheduler::{PayoutScheduler, SchedulerHandle, SchedulerStats};
