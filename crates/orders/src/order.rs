use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{Aggregate, AggregateRoot, DomainError, ListingId, Money, OrderId, PaymentId, UserId};
use bazaar_events::Event;

use crate::transitions::{OrderKind, OrderStatus};

/// Who is asking for a state change.
///
/// Whether a `User` acts as customer or seller is decided by the order itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Actor {
    /// Payment settlement and other internal flows.
    System,
    Admin(UserId),
    User(UserId),
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::Admin(id) => write!(f, "admin:{id}"),
            Actor::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Order line: listing, quantity, unit price at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub listing_id: ListingId,
    pub title: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl LineItem {
    pub fn subtotal(&self) -> Result<Money, DomainError> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Shipment tracking, opened on `shipped` and closed on `delivered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTracking {
    pub started_at: DateTime<Utc>,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Aggregate root: Order.
///
/// One order per seller and kind within a checkout; several orders may share
/// one payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: Option<UserId>,
    seller_id: Option<UserId>,
    kind: OrderKind,
    lines: Vec<LineItem>,
    delivery_fee: Money,
    total_amount: Money,
    currency: String,
    status: OrderStatus,
    payment_id: Option<PaymentId>,
    shipping_address: Option<String>,
    delivery_tracking: Option<DeliveryTracking>,
    deleted_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            customer_id: None,
            seller_id: None,
            kind: OrderKind::Product,
            lines: Vec::new(),
            delivery_fee: Money::ZERO,
            total_amount: Money::ZERO,
            currency: String::new(),
            status: OrderStatus::Pending,
            payment_id: None,
            shipping_address: None,
            delivery_tracking: None,
            deleted_at: None,
            version: 0,
            created: false,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> Option<UserId> {
        self.customer_id
    }

    pub fn seller_id(&self) -> Option<UserId> {
        self.seller_id
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn delivery_fee(&self) -> Money {
        self.delivery_fee
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment_id
    }

    pub fn shipping_address(&self) -> Option<&str> {
        self.shipping_address.as_deref()
    }

    pub fn delivery_tracking(&self) -> Option<&DeliveryTracking> {
        self.delivery_tracking.as_ref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Customer or seller of this order.
    pub fn is_party(&self, user: UserId) -> bool {
        self.customer_id == Some(user) || self.seller_id == Some(user)
    }

    /// Whether `actor` may move this order to `to`. Checked before legality.
    pub fn authorize(&self, actor: Actor, to: OrderStatus) -> Result<(), DomainError> {
        let allowed = match (to, actor) {
            (_, Actor::Admin(_)) => true,
            (OrderStatus::Paid, Actor::System) => true,
            (OrderStatus::Paid, Actor::User(_)) => false,
            (OrderStatus::Cancelled, Actor::System) => true,
            (OrderStatus::Cancelled, Actor::User(user)) => self.customer_id == Some(user),
            (_, Actor::System) => false,
            (_, Actor::User(user)) => self.seller_id == Some(user),
        };

        if !allowed {
            return Err(DomainError::unauthorized(format!(
                "{actor} may not move order {} to '{to}'",
                self.id
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub customer_id: UserId,
    pub seller_id: UserId,
    pub kind: OrderKind,
    pub lines: Vec<LineItem>,
    pub delivery_fee: Money,
    pub currency: String,
    pub payment_id: PaymentId,
    pub shipping_address: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub order_id: OrderId,
    pub to: OrderStatus,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOrder {
    pub order_id: OrderId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    ChangeStatus(ChangeStatus),
    DeleteOrder(DeleteOrder),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub customer_id: UserId,
    pub seller_id: UserId,
    pub kind: OrderKind,
    pub lines: Vec<LineItem>,
    pub delivery_fee: Money,
    pub total_amount: Money,
    pub currency: String,
    pub payment_id: PaymentId,
    pub shipping_address: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
///
/// Carries the parties and total so read models need no lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub customer_id: UserId,
    pub seller_id: UserId,
    pub kind: OrderKind,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub total_amount: Money,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeleted {
    pub order_id: OrderId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderStatusChanged(OrderStatusChanged),
    OrderDeleted(OrderDeleted),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderStatusChanged(_) => "orders.order.status_changed",
            OrderEvent::OrderDeleted(_) => "orders.order.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderStatusChanged(e) => e.occurred_at,
            OrderEvent::OrderDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.customer_id = Some(e.customer_id);
                self.seller_id = Some(e.seller_id);
                self.kind = e.kind;
                self.lines = e.lines.clone();
                self.delivery_fee = e.delivery_fee;
                self.total_amount = e.total_amount;
                self.currency = e.currency.clone();
                self.status = OrderStatus::Pending;
                self.payment_id = Some(e.payment_id);
                self.shipping_address = e.shipping_address.clone();
                self.created = true;
                self.created_at = Some(e.occurred_at);
            }
            OrderEvent::OrderStatusChanged(e) => {
                self.status = e.to;
                match e.to {
                    OrderStatus::Shipped => {
                        self.delivery_tracking = Some(DeliveryTracking {
                            started_at: e.occurred_at,
                            estimated_delivery_at: None,
                            delivered_at: None,
                            active: true,
                        });
                    }
                    OrderStatus::Delivered => {
                        if let Some(tracking) = self.delivery_tracking.as_mut() {
                            tracking.delivered_at = Some(e.occurred_at);
                            tracking.active = false;
                        }
                    }
                    _ => {}
                }
            }
            OrderEvent::OrderDeleted(e) => {
                self.deleted_at = Some(e.occurred_at);
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
            OrderCommand::DeleteOrder(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Order {
    fn ensure_live(&self, order_id: OrderId) -> Result<(), DomainError> {
        if !self.created || self.is_deleted() {
            return Err(DomainError::not_found(format!("order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order must contain at least one line"));
        }
        if cmd.customer_id == cmd.seller_id {
            return Err(DomainError::validation("sellers cannot order their own listings"));
        }
        for line in &cmd.lines {
            if line.quantity == 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            if line.unit_price.is_zero() {
                return Err(DomainError::validation("unit_price must be positive"));
            }
        }
        if !cmd.delivery_fee.is_zero() && !cmd.kind.ships() {
            return Err(DomainError::validation(format!(
                "{} orders do not carry a delivery fee",
                cmd.kind
            )));
        }

        let subtotals = cmd
            .lines
            .iter()
            .map(LineItem::subtotal)
            .collect::<Result<Vec<_>, _>>()?;
        let total_amount = Money::sum(subtotals)?.checked_add(cmd.delivery_fee)?;

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            seller_id: cmd.seller_id,
            kind: cmd.kind,
            lines: cmd.lines.clone(),
            delivery_fee: cmd.delivery_fee,
            total_amount,
            currency: cmd.currency.clone(),
            payment_id: cmd.payment_id,
            shipping_address: cmd.shipping_address.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_live(cmd.order_id)?;
        self.authorize(cmd.actor, cmd.to)?;

        if !self.kind.allows(self.status, cmd.to) {
            return Err(DomainError::invalid_transition(self.status, cmd.to));
        }

        let (customer_id, seller_id) = self.parties()?;

        Ok(vec![OrderEvent::OrderStatusChanged(OrderStatusChanged {
            order_id: self.id,
            customer_id,
            seller_id,
            kind: self.kind,
            from: self.status,
            to: cmd.to,
            total_amount: self.total_amount,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_live(cmd.order_id)?;

        let allowed = match cmd.actor {
            Actor::Admin(_) => true,
            Actor::User(user) => self.is_party(user),
            Actor::System => false,
        };
        if !allowed {
            return Err(DomainError::unauthorized(format!(
                "{} may not delete order {}",
                cmd.actor, self.id
            )));
        }
        if self.status != OrderStatus::Delivered {
            return Err(DomainError::conflict(format!(
                "only delivered orders can be deleted (status: {})",
                self.status
            )));
        }

        Ok(vec![OrderEvent::OrderDeleted(OrderDeleted {
            order_id: self.id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn parties(&self) -> Result<(UserId, UserId), DomainError> {
        match (self.customer_id, self.seller_id) {
            (Some(c), Some(s)) => Ok((c, s)),
            _ => Err(DomainError::invariant("order is missing its parties")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_events::execute;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_line(quantity: u32, unit_price: u64) -> LineItem {
        LineItem {
            listing_id: ListingId::generate(),
            title: "Item".to_string(),
            quantity,
            unit_price: Money(unit_price),
        }
    }

    fn test_order(kind: OrderKind) -> Order {
        let id = OrderId::generate();
        let mut order = Order::empty(id);
        let delivery_fee = if kind.ships() { Money(500) } else { Money::ZERO };
        execute(
            &mut order,
            &OrderCommand::PlaceOrder(PlaceOrder {
                order_id: id,
                customer_id: UserId::new(),
                seller_id: UserId::new(),
                kind,
                lines: vec![test_line(2, 1_000), test_line(1, 2_500)],
                delivery_fee,
                currency: "NGN".to_string(),
                payment_id: PaymentId::generate(),
                shipping_address: Some("12 Marina Road".to_string()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        order
    }

    fn change(order: &Order, to: OrderStatus, actor: Actor) -> OrderCommand {
        OrderCommand::ChangeStatus(ChangeStatus {
            order_id: order.id_typed(),
            to,
            actor,
            occurred_at: test_time(),
        })
    }

    fn seller(order: &Order) -> Actor {
        Actor::User(order.seller_id().unwrap())
    }

    fn customer(order: &Order) -> Actor {
        Actor::User(order.customer_id().unwrap())
    }

    #[test]
    fn total_is_sum_of_lines_plus_delivery_fee() {
        let order = test_order(OrderKind::Product);
        assert_eq!(order.total_amount(), Money(2 * 1_000 + 2_500 + 500));
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn tickets_reject_delivery_fee() {
        let order = Order::empty(OrderId::generate());
        let err = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id: *order.id(),
                customer_id: UserId::new(),
                seller_id: UserId::new(),
                kind: OrderKind::Ticket,
                lines: vec![test_line(1, 1_000)],
                delivery_fee: Money(100),
                currency: "NGN".to_string(),
                payment_id: PaymentId::generate(),
                shipping_address: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn only_system_or_admin_can_mark_paid() {
        let order = test_order(OrderKind::Product);

        let err = order
            .handle(&change(&order, OrderStatus::Paid, seller(&order)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        assert!(order.handle(&change(&order, OrderStatus::Paid, Actor::System)).is_ok());
        assert!(
            order
                .handle(&change(&order, OrderStatus::Paid, Actor::Admin(UserId::new())))
                .is_ok()
        );
    }

    #[test]
    fn seller_cannot_cancel_and_customer_cannot_ship() {
        let order = test_order(OrderKind::Product);

        let err = order
            .handle(&change(&order, OrderStatus::Cancelled, seller(&order)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        let err = order
            .handle(&change(&order, OrderStatus::Confirmed, customer(&order)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[test]
    fn authorization_is_checked_before_legality() {
        let mut order = test_order(OrderKind::Product);
        ({ let cmd = change(&order, OrderStatus::Paid, Actor::System); execute(&mut order, &cmd) }).unwrap();

        // Illegal (paid -> cancelled) and unauthorized (seller cancelling).
        let err = order
            .handle(&change(&order, OrderStatus::Cancelled, seller(&order)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[test]
    fn shipping_opens_and_delivery_closes_tracking() {
        let mut order = test_order(OrderKind::Product);
        ({ let cmd = change(&order, OrderStatus::Paid, Actor::System); execute(&mut order, &cmd) }).unwrap();
        ({ let cmd = change(&order, OrderStatus::Shipped, seller(&order)); execute(&mut order, &cmd) }).unwrap();

        let tracking = order.delivery_tracking().unwrap().clone();
        assert!(tracking.active);
        assert!(tracking.delivered_at.is_none());

        ({ let cmd = change(&order, OrderStatus::Delivered, seller(&order)); execute(&mut order, &cmd) }).unwrap();
        let tracking = order.delivery_tracking().unwrap();
        assert!(!tracking.active);
        assert!(tracking.delivered_at.is_some());
        assert_eq!(order.version(), 4);
    }

    #[test]
    fn delivered_to_shipped_is_an_invalid_transition() {
        let mut order = test_order(OrderKind::Product);
        for to in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered] {
            ({ let cmd = change(&order, to, seller(&order)); execute(&mut order, &cmd) }).unwrap();
        }

        let err = order
            .handle(&change(&order, OrderStatus::Shipped, seller(&order)))
            .unwrap_err();
        match err {
            DomainError::InvalidTransition { from, to } => {
                assert_eq!(from, "delivered");
                assert_eq!(to, "shipped");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn cancel_after_ship_is_invalid() {
        let mut order = test_order(OrderKind::Product);
        ({ let cmd = change(&order, OrderStatus::Paid, Actor::System); execute(&mut order, &cmd) }).unwrap();
        ({ let cmd = change(&order, OrderStatus::Shipped, seller(&order)); execute(&mut order, &cmd) }).unwrap();

        let err = order
            .handle(&change(&order, OrderStatus::Cancelled, customer(&order)))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn delete_requires_delivered_and_a_party() {
        let mut order = test_order(OrderKind::Product);
        let delete = |order: &Order, actor| {
            OrderCommand::DeleteOrder(DeleteOrder {
                order_id: order.id_typed(),
                actor,
                occurred_at: test_time(),
            })
        };

        let err = order.handle(&delete(&order, customer(&order))).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        for to in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered] {
            ({ let cmd = change(&order, to, seller(&order)); execute(&mut order, &cmd) }).unwrap();
        }

        let err = order
            .handle(&delete(&order, Actor::User(UserId::new())))
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        ({ let cmd = delete(&order, customer(&order)); execute(&mut order, &cmd) }).unwrap();
        assert!(order.is_deleted());

        let err = order
            .handle(&change(&order, OrderStatus::Shipped, seller(&order)))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    fn any_kind() -> impl Strategy<Value = OrderKind> {
        prop_oneof![
            Just(OrderKind::Product),
            Just(OrderKind::Ticket),
            Just(OrderKind::Booking),
        ]
    }

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// With admin authority, a walk succeeds exactly on table pairs.
        #[test]
        fn only_table_pairs_succeed(kind in any_kind(), steps in prop::collection::vec(any_status(), 1..12)) {
            let mut order = test_order(kind);
            let admin = Actor::Admin(UserId::new());

            for to in steps {
                let from = order.status();
                let result = { let cmd = change(&order, to, admin); execute(&mut order, &cmd) };

                if kind.allows(from, to) {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(order.status(), to);
                } else {
                    let is_invalid_transition = matches!(result, Err(DomainError::InvalidTransition { .. }));
                    prop_assert!(is_invalid_transition);
                    prop_assert_eq!(order.status(), from);
                }
            }
        }
    }
}
