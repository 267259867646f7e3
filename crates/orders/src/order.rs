use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agrinet_core::{Aggregate, AggregateRoot, DomainError, Money, OrderId, ProductId, UserId};
use agrinet_events::Event;

use crate::escrow::{EscrowEffect, EscrowLedger};
use crate::status::OrderStatus;

/// Aggregate root: Order.
///
/// `escrow_locked` always equals `EscrowLedger::locked(status)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    id: OrderId,
    buyer_id: UserId,
    product_id: ProductId,
    /// Owner of the product when the order was placed.
    seller_id: UserId,
    quantity: i64,
    total_amount: Money,
    status: OrderStatus,
    escrow_locked: bool,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed instance (target of `PlaceOrder`).
    pub fn empty(id: OrderId) -> Self {
        let nil = UserId::from_uuid(Uuid::nil());
        Self {
            id,
            buyer_id: nil,
            product_id: ProductId::from_uuid(Uuid::nil()),
            seller_id: nil,
            quantity: 0,
            total_amount: Money::ZERO,
            status: OrderStatus::Created,
            escrow_locked: false,
            idempotency_key: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
            created: false,
        }
    }

    /// Rebuild an order from its persisted row.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: OrderId,
        buyer_id: UserId,
        product_id: ProductId,
        seller_id: UserId,
        quantity: i64,
        total_amount: Money,
        status: OrderStatus,
        idempotency_key: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            buyer_id,
            product_id,
            seller_id,
            quantity,
            total_amount,
            status,
            escrow_locked: EscrowLedger::locked(status),
            idempotency_key,
            created_at,
            updated_at,
            version,
            created: true,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn buyer_id(&self) -> UserId {
        self.buyer_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn seller_id(&self) -> UserId {
        self.seller_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn escrow_locked(&self) -> bool {
        self.escrow_locked
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub(crate) fn set_escrow_locked(&mut self, locked: bool) {
        self.escrow_locked = locked;
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
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
///
/// `unit_price` and `seller_id` are the product snapshot taken by the stock
/// reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub product_id: ProductId,
    pub seller_id: UserId,
    pub quantity: i64,
    pub unit_price: Money,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus. Authorization is checked before this point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub order_id: OrderId,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    ChangeStatus(ChangeStatus),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub product_id: ProductId,
    pub seller_id: UserId,
    pub quantity: i64,
    pub total_amount: Money,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub escrow: EscrowEffect,
    pub escrow_locked: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderStatusChanged(OrderStatusChanged),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderStatusChanged(_) => "orders.order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderStatusChanged(e) => e.occurred_at,
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
                self.buyer_id = e.buyer_id;
                self.product_id = e.product_id;
                self.seller_id = e.seller_id;
                self.quantity = e.quantity;
                self.total_amount = e.total_amount;
                self.status = OrderStatus::Created;
                self.escrow_locked = EscrowLedger::locked(OrderStatus::Created);
                self.idempotency_key = e.idempotency_key.clone();
                self.created_at = e.occurred_at;
                self.updated_at = e.occurred_at;
                self.created = true;
            }
            OrderEvent::OrderStatusChanged(e) => {
                self.status = e.to;
                match e.escrow {
                    EscrowEffect::Lock => EscrowLedger::lock(self),
                    EscrowEffect::Release => EscrowLedger::release(self),
                    EscrowEffect::Hold | EscrowEffect::None => {}
                }
                self.updated_at = e.occurred_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl Order {
    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if self.id != cmd.order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let total_amount = cmd.unit_price.checked_mul(cmd.quantity)?;

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            buyer_id: cmd.buyer_id,
            product_id: cmd.product_id,
            seller_id: cmd.seller_id,
            quantity: cmd.quantity,
            total_amount,
            idempotency_key: cmd.idempotency_key.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != cmd.order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        if !self.status.can_transition_to(cmd.to) {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str(),
                to: cmd.to.as_str(),
            });
        }

        let escrow = EscrowLedger::effect(self.status, cmd.to);

        Ok(vec![OrderEvent::OrderStatusChanged(OrderStatusChanged {
            order_id: self.id,
            from: self.status,
            to: cmd.to,
            escrow,
            escrow_locked: EscrowLedger::apply(self.escrow_locked, escrow),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placed(quantity: i64, unit_price: u64) -> Order {
        let id = OrderId::new();
        let mut order = Order::empty(id);
        order
            .execute(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id: id,
                buyer_id: UserId::new(),
                product_id: ProductId::new(),
                seller_id: UserId::new(),
                quantity,
                unit_price: Money::from_minor(unit_price),
                idempotency_key: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        order
    }

    fn change(order: &Order, to: OrderStatus) -> OrderCommand {
        OrderCommand::ChangeStatus(ChangeStatus {
            order_id: order.id_typed(),
            to,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn placed_order_is_created_and_unlocked() {
        let order = placed(2, 10);
        assert_eq!(order.status(), OrderStatus::Created);
        assert_eq!(order.total_amount(), Money::from_minor(20));
        assert!(!order.escrow_locked());
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let id = OrderId::new();
        let order = Order::empty(id);
        let err = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id: id,
                buyer_id: UserId::new(),
                product_id: ProductId::new(),
                seller_id: UserId::new(),
                quantity: 0,
                unit_price: Money::from_minor(10),
                idempotency_key: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn escrow_follows_happy_path() {
        let mut order = placed(1, 10);

        order.execute(&change(&order, OrderStatus::Paid)).unwrap();
        assert!(order.escrow_locked());

        order.execute(&change(&order, OrderStatus::Shipped)).unwrap();
        assert!(order.escrow_locked());

        let events = order.execute(&change(&order, OrderStatus::Delivered)).unwrap();
        assert!(!order.escrow_locked());
        assert!(order.status().is_terminal());
        match &events[0] {
            OrderEvent::OrderStatusChanged(e) => assert_eq!(e.escrow, EscrowEffect::Release),
            _ => panic!("Expected OrderStatusChanged event"),
        }
    }

    #[test]
    fn delivered_cannot_go_back_to_paid() {
        let mut order = placed(1, 10);
        order.execute(&change(&order, OrderStatus::Paid)).unwrap();
        order.execute(&change(&order, OrderStatus::Shipped)).unwrap();
        order.execute(&change(&order, OrderStatus::Delivered)).unwrap();

        let err = order.handle(&change(&order, OrderStatus::Paid)).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: "delivered",
                to: "paid"
            }
        );
    }

    #[test]
    fn same_state_request_is_invalid() {
        let order = placed(1, 10);
        assert!(matches!(
            order.handle(&change(&order, OrderStatus::Created)),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn restore_derives_escrow_flag() {
        let order = placed(1, 10);
        let restored = Order::restore(
            order.id_typed(),
            order.buyer_id(),
            order.product_id(),
            order.seller_id(),
            1,
            Money::from_minor(10),
            OrderStatus::Shipped,
            None,
            order.created_at(),
            order.updated_at(),
            3,
        );
        assert!(restored.escrow_locked());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_status() -> impl Strategy<Value = OrderStatus> {
            proptest::sample::select(OrderStatus::ALL.to_vec())
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: whatever sequence of requests is attempted, the escrow
            /// flag matches the status after every step.
            #[test]
            fn escrow_invariant_holds(requests in proptest::collection::vec(any_status(), 0..20)) {
                let mut order = placed(1, 10);
                for to in requests {
                    let before = order.clone();
                    match order.execute(&change(&order, to)) {
                        Ok(_) => prop_assert_eq!(order.status(), to),
                        Err(_) => prop_assert_eq!(&order, &before),
                    }
                    prop_assert_eq!(order.escrow_locked(), EscrowLedger::locked(order.status()));
                }
            }

            /// Property: terminal orders reject every request.
            #[test]
            fn terminal_orders_are_frozen(to in any_status()) {
                let mut order = placed(1, 10);
                order.execute(&change(&order, OrderStatus::Disputed)).unwrap();
                order.execute(&change(&order, OrderStatus::Refunded)).unwrap();
                prop_assert!(order.handle(&change(&order, to)).is_err());
            }
        }
    }
}
