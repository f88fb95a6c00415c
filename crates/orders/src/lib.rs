//! Orders domain: the order aggregate, its per-kind state machine and
//! checkout planning.

pub mod checkout;
pub mod order;
pub mod transitions;

pub use checkout::{CheckoutPlan, OrderDraft, PricedLine, RequestedLine, merge_requested, plan_checkout};
pub use order::{
    Actor, ChangeStatus, DeleteOrder, DeliveryTracking, LineItem, Order, OrderCommand,
    OrderDeleted, OrderEvent, OrderPlaced, OrderStatusChanged, PlaceOrder,
};
pub use transitions::{OrderKind, OrderStatus};
