use std::collections::HashMap;
use std::sync::RwLock;

use agrinet_accounts::User;
use agrinet_catalog::Product;
use agrinet_core::{AggregateRoot, ExpectedVersion, OrderId, ProductId, UserId};
use agrinet_orders::Order;

use super::r#trait::{MarketStore, OrderFilter, StoreError, UnitOfWork};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    order_keys: HashMap<(UserId, String), OrderId>,
}

/// In-memory market store.
///
/// Intended for tests/dev. A single write lock covers the whole unit of work,
/// so version checks and writes cannot interleave with another commit.
#[derive(Debug, Default)]
pub struct InMemoryMarketStore {
    tables: RwLock<Tables>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn check(kind: &str, id: impl core::fmt::Display, expected: ExpectedVersion, actual: Option<u64>) -> Result<(), StoreError> {
        if expected.matches(actual) {
            Ok(())
        } else {
            Err(StoreError::Concurrency(format!(
                "{kind} {id}: expected {expected:?}, found {actual:?}"
            )))
        }
    }
}

impl MarketStore for InMemoryMarketStore {
    fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    fn load_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        let tables = self.read()?;
        Ok(ids.iter().filter_map(|id| tables.users.get(id).cloned()).collect())
    }

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let mut products: Vec<Product> = self.read()?.products.values().cloned().collect();
        products.sort_by(|a, b| {
            b.listed_at()
                .cmp(&a.listed_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(products)
    }

    fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    fn find_order_by_key(
        &self,
        buyer_id: UserId,
        idempotency_key: &str,
    ) -> Result<Option<Order>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .order_keys
            .get(&(buyer_id, idempotency_key.to_string()))
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .read()?
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(orders)
    }

    fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        if unit.is_empty() {
            return Ok(());
        }

        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        // Validate everything before touching any table.
        for w in &unit.users {
            let id = w.row.id_typed();
            Self::check("user", id, w.expected, tables.users.get(&id).map(User::version))?;
        }
        for w in &unit.products {
            let id = w.row.id_typed();
            Self::check("product", id, w.expected, tables.products.get(&id).map(|p| p.version()))?;
        }
        let mut new_keys: Vec<(UserId, String)> = Vec::new();
        for w in &unit.orders {
            let id = w.row.id_typed();
            Self::check("order", id, w.expected, tables.orders.get(&id).map(|o| o.version()))?;

            if let Some(key) = w.row.idempotency_key() {
                let slot = (w.row.buyer_id(), key.to_string());
                let taken = match tables.order_keys.get(&slot) {
                    Some(owner) => *owner != id,
                    None => new_keys.contains(&slot),
                };
                if taken {
                    return Err(StoreError::DuplicateKey(format!(
                        "idempotency key '{key}' already used by buyer {}",
                        w.row.buyer_id()
                    )));
                }
                new_keys.push(slot);
            }
        }

        for w in unit.users {
            tables.users.insert(w.row.id_typed(), w.row);
        }
        for w in unit.products {
            tables.products.insert(w.row.id_typed(), w.row);
        }
        for w in unit.orders {
            let id = w.row.id_typed();
            if let Some(key) = w.row.idempotency_key() {
                tables.order_keys.insert((w.row.buyer_id(), key.to_string()), id);
            }
            tables.orders.insert(id, w.row);
        }

        Ok(())
    }
}
