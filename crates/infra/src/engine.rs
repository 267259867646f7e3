//! Order engine: order creation and status transitions.
//!
//! ```text
//! create_order:  load product → reserve stock → place order → commit (product + order)
//! transition:    load order → policy → state machine → escrow → [release stock] → commit
//! ```
//!
//! Every write is one `UnitOfWork` with per-row expected versions. A stale
//! read surfaces as `StoreError::Concurrency`; the engine then re-reads and
//! decides again, so the loser of a race observes the winner's state
//! (`InsufficientStock`, `InvalidTransition`) rather than a storage error.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use agrinet_auth::{Actor, AuthzError};
use agrinet_catalog::{AvailableProduct, Product, ProductCommand, ReleaseStock, ReserveStock};
use agrinet_core::{Aggregate, AggregateRoot, DomainError, OrderId, ProductId, UserId};
use agrinet_orders::{
    ChangeStatus, Order, OrderCommand, OrderStatus, Party, PermissionPolicy, PlaceOrder,
    PolicyDecision,
};

use crate::catalog_service::load_available;
use crate::notify::{Notification, NotificationKind, NotificationSink, Recipient, TracingSink};
use crate::outbox::{Effects, EnvelopePublisher, Outbox};
use crate::store::{MarketStore, OrderFilter, RowWrite, StoreError, UnitOfWork};

pub const PRODUCT_AGGREGATE: &str = "catalog.product";
pub const ORDER_AGGREGATE: &str = "orders.order";

/// Caller-facing failure classes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-fixable; never retried automatically.
    Validation,
    /// Refused; no side effect occurred.
    Authorization,
    NotFound,
    /// Infrastructure; safe to retry (with the same idempotency key).
    Transient,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("kyc verification required")]
    KycRequired,

    #[error("kyc verification rejected")]
    KycRejected,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InsufficientStock { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::KycRequired
            | EngineError::KycRejected
            | EngineError::Validation(_)
            | EngineError::Conflict(_) => ErrorKind::Validation,
            EngineError::Forbidden(_) => ErrorKind::Authorization,
            EngineError::ProductNotFound(_)
            | EngineError::OrderNotFound(_)
            | EngineError::UserNotFound(_) => ErrorKind::NotFound,
            EngineError::Store(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn is_concurrency(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::Concurrency(_)))
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InsufficientStock {
                requested,
                available,
            } => EngineError::InsufficientStock {
                requested,
                available,
            },
            DomainError::InvalidTransition { from, to } => EngineError::InvalidTransition { from, to },
            DomainError::KycRequired => EngineError::KycRequired,
            DomainError::KycRejected => EngineError::KycRejected,
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => EngineError::Validation(msg),
            DomainError::Conflict(msg) => EngineError::Conflict(msg),
            DomainError::NotFound => EngineError::Validation("not found".to_string()),
            DomainError::Unauthorized => EngineError::Forbidden("unauthorized".to_string()),
        }
    }
}

impl From<AuthzError> for EngineError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Forbidden(msg) => EngineError::Forbidden(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Re-read/re-decide attempts after a stale-version commit.
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 8,
        }
    }
}

/// Run `attempt` until it succeeds, fails for a reason other than a stale
/// read, or the retry budget is spent.
pub(crate) fn with_conflict_retries<T>(
    max_retries: u32,
    operation: &'static str,
    mut attempt: impl FnMut() -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    let mut retries = 0;
    loop {
        match attempt() {
            Err(err) if err.is_concurrency() && retries < max_retries => {
                retries += 1;
                tracing::debug!(operation, retries, error = %err, "stale read, retrying");
            }
            other => return other,
        }
    }
}

/// Order lifecycle orchestration over a [`MarketStore`].
///
/// Holds no mutable state; share it across threads behind an `Arc`.
pub struct OrderEngine<S> {
    store: S,
    effects: Effects,
    config: EngineConfig,
}

impl<S> OrderEngine<S>
where
    S: MarketStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            effects: Effects::new(Arc::new(TracingSink)),
            config: EngineConfig::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.effects.notifier = notifier;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EnvelopePublisher>) -> Self {
        self.effects.publisher = Some(publisher);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Place an order, reserving `quantity` units of the product.
    ///
    /// With an `idempotency_key`, a repeat by the same buyer returns the
    /// order created the first time and reserves nothing.
    #[instrument(
        skip_all,
        fields(buyer_id = %actor.user_id, product_id = %product_id, quantity = quantity),
        err
    )]
    pub fn create_order(
        &self,
        actor: &Actor,
        product_id: ProductId,
        quantity: i64,
        idempotency_key: Option<&str>,
    ) -> Result<Order, EngineError> {
        if let Some(key) = idempotency_key {
            if key.trim().is_empty() {
                return Err(EngineError::Validation("idempotency key cannot be blank".to_string()));
            }
        }

        let result = with_conflict_retries(self.config.max_conflict_retries, "create_order", || {
            self.try_create_order(actor, product_id, quantity, idempotency_key)
        });

        match (result, idempotency_key) {
            // Lost a race against a concurrent request carrying the same key.
            (Err(EngineError::Store(StoreError::DuplicateKey(_))), Some(key)) => {
                let existing = self.store.find_order_by_key(actor.user_id, key)?;
                existing.ok_or_else(|| {
                    EngineError::Store(StoreError::Backend(
                        "idempotency key taken but order not found".to_string(),
                    ))
                })
            }
            (result, _) => result,
        }
    }

    fn try_create_order(
        &self,
        actor: &Actor,
        product_id: ProductId,
        quantity: i64,
        idempotency_key: Option<&str>,
    ) -> Result<Order, EngineError> {
        let mut product = self
            .store
            .load_product(product_id)?
            .ok_or(EngineError::ProductNotFound(product_id))?;

        if quantity <= 0 {
            return Err(EngineError::Validation("quantity must be positive".to_string()));
        }

        if let Some(key) = idempotency_key {
            if let Some(existing) = self.store.find_order_by_key(actor.user_id, key)? {
                if existing.product_id() != product_id || existing.quantity() != quantity {
                    return Err(EngineError::Validation(format!(
                        "idempotency key '{key}' was used for a different order"
                    )));
                }
                tracing::info!(order_id = %existing.id_typed(), "idempotent replay");
                return Ok(existing);
            }
        }

        let now = Utc::now();
        let product_version = product.version();
        let stock_events = product.execute(&ProductCommand::ReserveStock(ReserveStock {
            product_id,
            quantity,
            occurred_at: now,
        }))?;

        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        let order_events = order.execute(&OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            buyer_id: actor.user_id,
            product_id,
            seller_id: product.owner_id(),
            quantity,
            unit_price: product.price(),
            idempotency_key: idempotency_key.map(str::to_string),
            occurred_at: now,
        }))?;

        self.store.commit(
            UnitOfWork::new()
                .with_product(RowWrite::update(product.clone(), product_version))
                .with_order(RowWrite::insert(order.clone())),
        )?;

        tracing::info!(
            order_id = %order_id,
            total_amount = %order.total_amount(),
            remaining = product.quantity(),
            "order created"
        );

        let mut outbox = Outbox::new();
        outbox.record(*product_id.as_uuid(), PRODUCT_AGGREGATE, product.version(), &stock_events);
        outbox.record(*order_id.as_uuid(), ORDER_AGGREGATE, order.version(), &order_events);
        outbox.notify(
            Notification::new(
                Recipient::User(order.seller_id()),
                NotificationKind::OrderCreated,
                format!(
                    "New order #{order_id} for {quantity} x {}; total {}.",
                    product.name(),
                    order.total_amount()
                ),
            )
            .for_order(order_id),
        );
        outbox.flush(&self.effects);

        Ok(order)
    }

    /// Move an order to `to` on behalf of `actor`.
    #[instrument(
        skip_all,
        fields(actor_id = %actor.user_id, role = %actor.role, order_id = %order_id, to = %to),
        err
    )]
    pub fn transition(
        &self,
        actor: &Actor,
        order_id: OrderId,
        to: OrderStatus,
    ) -> Result<Order, EngineError> {
        with_conflict_retries(self.config.max_conflict_retries, "transition", || {
            self.try_transition(actor, order_id, to)
        })
    }

    fn try_transition(
        &self,
        actor: &Actor,
        order_id: OrderId,
        to: OrderStatus,
    ) -> Result<Order, EngineError> {
        let mut order = self
            .store
            .load_order(order_id)?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        let decision = PermissionPolicy::explain(actor, &order, to);
        if decision.is_denied() {
            tracing::info!(decision = ?decision, "transition denied");
            return Err(EngineError::Forbidden(decision.reason));
        }

        let from = order.status();
        let order_version = order.version();
        let now = Utc::now();
        let order_events = order.execute(&OrderCommand::ChangeStatus(ChangeStatus {
            order_id,
            to,
            occurred_at: now,
        }))?;

        let mut unit = UnitOfWork::new().with_order(RowWrite::update(order.clone(), order_version));
        let mut outbox = Outbox::new();

        if to == OrderStatus::Refunded {
            let product_id = order.product_id();
            let mut product = self
                .store
                .load_product(product_id)?
                .ok_or(EngineError::ProductNotFound(product_id))?;
            let product_version = product.version();
            let stock_events = product.execute(&ProductCommand::ReleaseStock(ReleaseStock {
                product_id,
                quantity: order.quantity(),
                occurred_at: now,
            }))?;
            outbox.record(*product_id.as_uuid(), PRODUCT_AGGREGATE, product.version(), &stock_events);
            unit = unit.with_product(RowWrite::update(product, product_version));
        }

        self.store.commit(unit)?;

        tracing::info!(
            %from,
            %to,
            escrow_locked = order.escrow_locked(),
            rule = ?decision.rule,
            "order transitioned"
        );

        outbox.record(*order_id.as_uuid(), ORDER_AGGREGATE, order.version(), &order_events);
        for notification in transition_notifications(actor, &order, from, &decision) {
            outbox.notify(notification);
        }
        outbox.flush(&self.effects);

        Ok(order)
    }

    /// A single order, visible to its buyer, its seller and admins.
    #[instrument(skip_all, fields(actor_id = %actor.user_id, order_id = %order_id), err)]
    pub fn get_order(&self, actor: &Actor, order_id: OrderId) -> Result<Order, EngineError> {
        let order = self
            .store
            .load_order(order_id)?
            .ok_or(EngineError::OrderNotFound(order_id))?;
        if !actor.is_admin() && !order.involves(actor.user_id) {
            return Err(EngineError::Forbidden("actor is not a party to this order".to_string()));
        }
        Ok(order)
    }

    /// Orders where the actor is buyer or seller; admins see all. Newest first.
    #[instrument(skip(self, actor), fields(actor_id = %actor.user_id), err)]
    pub fn list_orders_for_actor(&self, actor: &Actor) -> Result<Vec<Order>, EngineError> {
        let filter = if actor.is_admin() {
            OrderFilter::All
        } else {
            OrderFilter::Participant(actor.user_id)
        };
        Ok(self.store.list_orders(filter)?)
    }

    #[instrument(skip(self), err)]
    pub fn list_available_products(&self) -> Result<Vec<AvailableProduct>, EngineError> {
        load_available(&self.store)
    }

    /// Product as currently stored, for callers that need the raw row.
    pub fn product(&self, product_id: ProductId) -> Result<Product, EngineError> {
        self.store
            .load_product(product_id)?
            .ok_or(EngineError::ProductNotFound(product_id))
    }
}

fn transition_notifications(
    actor: &Actor,
    order: &Order,
    from: OrderStatus,
    decision: &PolicyDecision,
) -> Vec<Notification> {
    let id = order.id_typed();
    let to = order.status();
    let note = |recipient: UserId, kind: NotificationKind, message: String| {
        Notification::new(Recipient::User(recipient), kind, message).for_order(id)
    };

    let acted_as_admin = decision.parties.contains(&Party::Admin)
        && decision.rule.map_or(true, |rule| rule.starts_with("admin_"));

    if acted_as_admin {
        let message = match to {
            OrderStatus::Delivered => format!("Admin released funds for order #{id}."),
            OrderStatus::Refunded => format!("Admin refunded order #{id}."),
            _ => format!("Admin moved order #{id} from {from} to {to}."),
        };
        return vec![
            note(order.buyer_id(), NotificationKind::OrderStatusChanged, message.clone()),
            note(order.seller_id(), NotificationKind::OrderStatusChanged, message),
        ];
    }

    let counterparty = if actor.user_id == order.buyer_id() {
        order.seller_id()
    } else {
        order.buyer_id()
    };

    match to {
        OrderStatus::Paid => vec![note(
            counterparty,
            NotificationKind::OrderStatusChanged,
            format!("Order #{id} has been paid; escrow locked."),
        )],
        OrderStatus::Shipped => vec![note(
            counterparty,
            NotificationKind::OrderStatusChanged,
            format!("Order #{id} marked shipped by seller."),
        )],
        OrderStatus::Delivered => vec![note(
            counterparty,
            NotificationKind::OrderStatusChanged,
            format!("Order #{id} delivered; funds released."),
        )],
        OrderStatus::Disputed => {
            let message = format!("Dispute opened for order #{id}.");
            vec![
                note(counterparty, NotificationKind::DisputeOpened, message.clone()),
                Notification::new(Recipient::Broadcast, NotificationKind::DisputeOpened, message)
                    .for_order(id),
            ]
        }
        OrderStatus::Created | OrderStatus::Refunded => vec![note(
            counterparty,
            NotificationKind::OrderStatusChanged,
            format!("Order #{id} moved from {from} to {to}."),
        )],
    }
}
