use std::sync::Arc;

use thiserror::Error;

use agrinet_accounts::User;
use agrinet_catalog::Product;
use agrinet_core::{ExpectedVersion, OrderId, ProductId, UserId};
use agrinet_orders::Order;

/// Storage operation error.
///
/// These are infrastructure failures, as opposed to domain errors. The engine
/// treats `Concurrency` as "re-read and decide again" and everything else as
/// transient.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row's version no longer matches what the writer read.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A uniqueness constraint was hit (e.g. a reused idempotency key).
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The backend is unavailable or returned something unusable.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A row to persist together with the version the writer based it on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowWrite<T> {
    pub row: T,
    pub expected: ExpectedVersion,
}

impl<T> RowWrite<T> {
    pub fn insert(row: T) -> Self {
        Self {
            row,
            expected: ExpectedVersion::New,
        }
    }

    pub fn update(row: T, read_version: u64) -> Self {
        Self {
            row,
            expected: ExpectedVersion::Exact(read_version),
        }
    }
}

/// Rows committed all-or-nothing.
///
/// Every row carries its own expectation; one stale row fails the whole unit
/// with `StoreError::Concurrency` and nothing is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    pub users: Vec<RowWrite<User>>,
    pub products: Vec<RowWrite<Product>>,
    pub orders: Vec<RowWrite<Order>>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, write: RowWrite<User>) -> Self {
        self.users.push(write);
        self
    }

    pub fn with_product(mut self, write: RowWrite<Product>) -> Self {
        self.products.push(write);
        self
    }

    pub fn with_order(mut self, write: RowWrite<Order>) -> Self {
        self.orders.push(write);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.products.is_empty() && self.orders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len() + self.products.len() + self.orders.len()
    }
}

/// Which orders to list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OrderFilter {
    All,
    /// Orders where the user is buyer or seller.
    Participant(UserId),
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        match self {
            OrderFilter::All => true,
            OrderFilter::Participant(user_id) => order.involves(*user_id),
        }
    }
}

/// Durable marketplace state: users, products and orders as versioned rows.
///
/// Implementations must:
/// - apply a `UnitOfWork` atomically, checking every row's `ExpectedVersion`
/// - reject a second order with the same `(buyer_id, idempotency_key)` with
///   `StoreError::DuplicateKey`
/// - return lists newest first
pub trait MarketStore: Send + Sync {
    fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    fn load_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError>;

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    fn find_order_by_key(
        &self,
        buyer_id: UserId,
        idempotency_key: &str,
    ) -> Result<Option<Order>, StoreError>;

    fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError>;

    fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError>;
}

impl<S> MarketStore for Arc<S>
where
    S: MarketStore + ?Sized,
{
    fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        (**self).load_user(id)
    }

    fn load_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        (**self).load_users(ids)
    }

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).load_product(id)
    }

    fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).list_products()
    }

    fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).load_order(id)
    }

    fn find_order_by_key(
        &self,
        buyer_id: UserId,
        idempotency_key: &str,
    ) -> Result<Option<Order>, StoreError> {
        (**self).find_order_by_key(buyer_id, idempotency_key)
    }

    fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError> {
        (**self).list_orders(filter)
    }

    fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        (**self).commit(unit)
    }
}

