//! Payments domain: payments, the commission calculator and commissions.

pub mod commission;
pub mod payment;

pub use commission::{
    CalculateCommission, CollectCommission, Commission, CommissionCommand, CommissionEvent,
    CommissionStatus, CompleteCommissionPayout, EscrowStatus, RefundCommission,
    ReleaseCommissionFromPayout, ScheduleCommissionPayout, Split, calculate,
};
pub use payment::{
    CompletePayment, FailPayment, InitiatePayment, Payment, PaymentCommand, PaymentEvent,
    PaymentMethod, PaymentStatus, RefundPayment,
};
