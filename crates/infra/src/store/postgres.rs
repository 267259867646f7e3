//! Postgres-backed market store.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | StoreError | Scenario |
//! |------------|---------------|------------|----------|
//! | Database (unique violation on the idempotency index) | `23505` | `DuplicateKey` | Reused `(buyer_id, idempotency_key)` |
//! | Database (other unique violation) | `23505` | `Concurrency` | Concurrent insert of the same row |
//! | Database (serialization failure) | `40001` | `Concurrency` | Transaction lost a race |
//! | Database (other) | any | `Backend` | Check constraints, FKs, ... |
//! | PoolClosed / Io / other | N/A | `Backend` | Connectivity |
//!
//! An `UPDATE … WHERE id = $1 AND version = $2` touching zero rows is reported
//! as `Concurrency` and the whole transaction is rolled back.
//!
//! ## Thread Safety
//!
//! `PostgresMarketStore` is `Send + Sync`; the SQLx pool handles connection
//! sharing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use agrinet_accounts::User;
use agrinet_auth::Role;
use agrinet_catalog::Product;
use agrinet_core::{AggregateRoot, ExpectedVersion, Money, OrderId, ProductId, UserId};
use agrinet_orders::{Order, OrderStatus};

use super::r#trait::{MarketStore, OrderFilter, RowWrite, StoreError, UnitOfWork};

const SCHEMA: &str = include_str!("../../migrations/0001_market.sql");

const IDEMPOTENCY_INDEX: &str = "idx_orders_buyer_idempotency_key";

const USER_COLUMNS: &str = "id, name, role, kyc_verified, name_locked, version";
const PRODUCT_COLUMNS: &str =
    "id, owner_id, name, description, price, quantity, listed_at, version";
const ORDER_COLUMNS: &str = "id, buyer_id, product_id, seller_id, quantity, total_amount, status, \
     idempotency_key, created_at, updated_at, version";

/// Postgres-backed market store.
///
/// Each `commit` runs in one transaction. Inserts rely on the primary key and
/// the idempotency index; updates carry the version the writer read.
#[derive(Debug, Clone)]
pub struct PostgresMarketStore {
    pool: Arc<PgPool>,
}

impl PostgresMarketStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply `migrations/0001_market.sql`. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn fetch_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn fetch_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(&uuids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_users", e))?;
        rows.iter().map(user_from_row).collect()
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    pub async fn fetch_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self), fields(product_count = tracing::field::Empty), err)]
    pub async fn fetch_products(&self) -> Result<Vec<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY listed_at DESC, id DESC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;

        Span::current().record("product_count", rows.len());
        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    pub async fn fetch_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_order", e))?;
        row.as_ref().map(order_from_row).transpose()
    }

    #[instrument(skip(self, idempotency_key), fields(buyer_id = %buyer_id), err)]
    pub async fn fetch_order_by_key(
        &self,
        buyer_id: UserId,
        idempotency_key: &str,
    ) -> Result<Option<Order>, StoreError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE buyer_id = $1 AND idempotency_key = $2"
        );
        let row = sqlx::query(&sql)
            .bind(*buyer_id.as_uuid())
            .bind(idempotency_key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_order_by_key", e))?;
        row.as_ref().map(order_from_row).transpose()
    }

    #[instrument(skip(self), fields(filter = ?filter), err)]
    pub async fn fetch_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError> {
        let participant: Option<Uuid> = match filter {
            OrderFilter::All => None,
            OrderFilter::Participant(user_id) => Some(*user_id.as_uuid()),
        };
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE ($1::uuid IS NULL OR buyer_id = $1 OR seller_id = $1) \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(participant)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_orders", e))?;
        rows.iter().map(order_from_row).collect()
    }

    /// Apply a unit of work in one transaction.
    #[instrument(
        skip(self, unit),
        fields(
            users = unit.users.len(),
            products = unit.products.len(),
            orders = unit.orders.len(),
            committed_rows = tracing::field::Empty
        ),
        err
    )]
    pub async fn commit_unit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        if unit.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        match write_unit(&mut tx, &unit).await {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Span::current().record("committed_rows", unit.len());
                Ok(())
            }
            Err(err) => {
                // Dropping the transaction rolls back too; keep the write error.
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

async fn write_unit(tx: &mut Transaction<'_, Postgres>, unit: &UnitOfWork) -> Result<(), StoreError> {
    for w in &unit.users {
        write_user(tx, w).await?;
    }
    for w in &unit.products {
        write_product(tx, w).await?;
    }
    for w in &unit.orders {
        write_order(tx, w).await?;
    }
    Ok(())
}

fn ensure_updated(kind: &str, id: impl core::fmt::Display, expected: ExpectedVersion, rows: u64) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(StoreError::Concurrency(format!(
            "{kind} {id}: expected {expected:?}, row missing or changed"
        )));
    }
    Ok(())
}

async fn write_user(tx: &mut Transaction<'_, Postgres>, w: &RowWrite<User>) -> Result<(), StoreError> {
    let user = &w.row;
    let version = to_i64(user.version(), "user.version")?;

    let query = match w.expected {
        ExpectedVersion::New => sqlx::query(
            "INSERT INTO users (id, name, role, kyc_verified, name_locked, version) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        ),
        ExpectedVersion::Any => sqlx::query(
            "INSERT INTO users (id, name, role, kyc_verified, name_locked, version) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, role = EXCLUDED.role, \
             kyc_verified = EXCLUDED.kyc_verified, name_locked = EXCLUDED.name_locked, \
             version = EXCLUDED.version",
        ),
        ExpectedVersion::Exact(_) => sqlx::query(
            "UPDATE users SET name = $2, role = $3, kyc_verified = $4, name_locked = $5, version = $6 \
             WHERE id = $1 AND version = $7",
        ),
    };

    let mut query = query
        .bind(*user.id_typed().as_uuid())
        .bind(user.name())
        .bind(user.role().as_str())
        .bind(user.is_kyc_verified())
        .bind(user.is_name_locked())
        .bind(version);
    if let ExpectedVersion::Exact(read) = w.expected {
        query = query.bind(to_i64(read, "expected_version")?);
    }

    let result = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_user", e))?;
    ensure_updated("user", user.id_typed(), w.expected, result.rows_affected())
}

async fn write_product(tx: &mut Transaction<'_, Postgres>, w: &RowWrite<Product>) -> Result<(), StoreError> {
    let product = &w.row;
    let version = to_i64(product.version(), "product.version")?;
    let price = to_i64(product.price().minor_units(), "product.price")?;

    let query = match w.expected {
        ExpectedVersion::New => sqlx::query(
            "INSERT INTO products (id, owner_id, name, description, price, quantity, listed_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        ),
        ExpectedVersion::Any => sqlx::query(
            "INSERT INTO products (id, owner_id, name, description, price, quantity, listed_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, description = EXCLUDED.description, \
             price = EXCLUDED.price, quantity = EXCLUDED.quantity, version = EXCLUDED.version",
        ),
        ExpectedVersion::Exact(_) => sqlx::query(
            "UPDATE products SET owner_id = $2, name = $3, description = $4, price = $5, \
             quantity = $6, listed_at = $7, version = $8 \
             WHERE id = $1 AND version = $9",
        ),
    };

    let mut query = query
        .bind(*product.id_typed().as_uuid())
        .bind(*product.owner_id().as_uuid())
        .bind(product.name())
        .bind(product.description())
        .bind(price)
        .bind(product.quantity())
        .bind(product.listed_at())
        .bind(version);
    if let ExpectedVersion::Exact(read) = w.expected {
        query = query.bind(to_i64(read, "expected_version")?);
    }

    let result = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_product", e))?;
    ensure_updated("product", product.id_typed(), w.expected, result.rows_affected())
}

async fn write_order(tx: &mut Transaction<'_, Postgres>, w: &RowWrite<Order>) -> Result<(), StoreError> {
    let order = &w.row;
    let version = to_i64(order.version(), "order.version")?;
    let total = to_i64(order.total_amount().minor_units(), "order.total_amount")?;

    let query = match w.expected {
        ExpectedVersion::New => sqlx::query(
            "INSERT INTO orders (id, buyer_id, product_id, seller_id, quantity, total_amount, status, \
             escrow_locked, idempotency_key, created_at, updated_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        ),
        ExpectedVersion::Any => sqlx::query(
            "INSERT INTO orders (id, buyer_id, product_id, seller_id, quantity, total_amount, status, \
             escrow_locked, idempotency_key, created_at, updated_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, \
             escrow_locked = EXCLUDED.escrow_locked, updated_at = EXCLUDED.updated_at, \
             version = EXCLUDED.version",
        ),
        ExpectedVersion::Exact(_) => sqlx::query(
            "UPDATE orders SET buyer_id = $2, product_id = $3, seller_id = $4, quantity = $5, \
             total_amount = $6, status = $7, escrow_locked = $8, idempotency_key = $9, \
             created_at = $10, updated_at = $11, version = $12 \
             WHERE id = $1 AND version = $13",
        ),
    };

    let mut query = query
        .bind(*order.id_typed().as_uuid())
        .bind(*order.buyer_id().as_uuid())
        .bind(*order.product_id().as_uuid())
        .bind(*order.seller_id().as_uuid())
        .bind(order.quantity())
        .bind(total)
        .bind(order.status().as_str())
        .bind(order.escrow_locked())
        .bind(order.idempotency_key())
        .bind(order.created_at())
        .bind(order.updated_at())
        .bind(version);
    if let ExpectedVersion::Exact(read) = w.expected {
        query = query.bind(to_i64(read, "expected_version")?);
    }

    let result = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_order", e))?;
    ensure_updated("order", order.id_typed(), w.expected, result.rows_affected())
}

fn to_i64(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("{field} out of range: {value}")))
}

fn to_u64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Backend(format!("{field} out of range: {value}")))
}

fn decode(field: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode {field}: {err}"))
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let role: String = row.try_get("role").map_err(|e| decode("users.role", e))?;
    let role: Role = role
        .parse()
        .map_err(|e| StoreError::Backend(format!("users.role: {e}")))?;
    let version: i64 = row.try_get("version").map_err(|e| decode("users.version", e))?;

    Ok(User::restore(
        UserId::from_uuid(row.try_get("id").map_err(|e| decode("users.id", e))?),
        row.try_get("name").map_err(|e| decode("users.name", e))?,
        role,
        row.try_get("kyc_verified").map_err(|e| decode("users.kyc_verified", e))?,
        row.try_get("name_locked").map_err(|e| decode("users.name_locked", e))?,
        to_u64(version, "users.version")?,
    ))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let price: i64 = row.try_get("price").map_err(|e| decode("products.price", e))?;
    let version: i64 = row.try_get("version").map_err(|e| decode("products.version", e))?;
    let listed_at: DateTime<Utc> = row
        .try_get("listed_at")
        .map_err(|e| decode("products.listed_at", e))?;

    Ok(Product::restore(
        ProductId::from_uuid(row.try_get("id").map_err(|e| decode("products.id", e))?),
        UserId::from_uuid(row.try_get("owner_id").map_err(|e| decode("products.owner_id", e))?),
        row.try_get("name").map_err(|e| decode("products.name", e))?,
        row.try_get("description").map_err(|e| decode("products.description", e))?,
        Money::from_minor(to_u64(price, "products.price")?),
        row.try_get("quantity").map_err(|e| decode("products.quantity", e))?,
        listed_at,
        to_u64(version, "products.version")?,
    ))
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status").map_err(|e| decode("orders.status", e))?;
    let status: OrderStatus = status
        .parse()
        .map_err(|e| StoreError::Backend(format!("orders.status: {e}")))?;
    let total: i64 = row
        .try_get("total_amount")
        .map_err(|e| decode("orders.total_amount", e))?;
    let version: i64 = row.try_get("version").map_err(|e| decode("orders.version", e))?;

    Ok(Order::restore(
        OrderId::from_uuid(row.try_get("id").map_err(|e| decode("orders.id", e))?),
        UserId::from_uuid(row.try_get("buyer_id").map_err(|e| decode("orders.buyer_id", e))?),
        ProductId::from_uuid(row.try_get("product_id").map_err(|e| decode("orders.product_id", e))?),
        UserId::from_uuid(row.try_get("seller_id").map_err(|e| decode("orders.seller_id", e))?),
        row.try_get("quantity").map_err(|e| decode("orders.quantity", e))?,
        Money::from_minor(to_u64(total, "orders.total_amount")?),
        status,
        row.try_get("idempotency_key")
            .map_err(|e| decode("orders.idempotency_key", e))?,
        row.try_get("created_at").map_err(|e| decode("orders.created_at", e))?,
        row.try_get("updated_at").map_err(|e| decode("orders.updated_at", e))?,
        to_u64(version, "orders.version")?,
    ))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") if db_err.constraint() == Some(IDEMPOTENCY_INDEX) => {
                    StoreError::DuplicateKey(msg)
                }
                Some("23505") | Some("40001") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// The MarketStore trait is synchronous; bridge through the ambient tokio
// runtime. Requires a multi-threaded runtime (block_in_place).
fn block_on<F, T>(fut: F) -> Result<T, StoreError>
where
    F: core::future::Future<Output = Result<T, StoreError>>,
{
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "PostgresMarketStore requires a tokio runtime; call it from within one".to_string(),
        )
    })?;
    if handle.runtime_flavor() != tokio::runtime::RuntimeFlavor::MultiThread {
        return Err(StoreError::Backend(
            "PostgresMarketStore requires a multi-threaded runtime".to_string(),
        ));
    }
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl MarketStore for PostgresMarketStore {
    fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        block_on(self.fetch_user(id))
    }

    fn load_users(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        block_on(self.fetch_users(ids))
    }

    fn load_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        block_on(self.fetch_product(id))
    }

    fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        block_on(self.fetch_products())
    }

    fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        block_on(self.fetch_order(id))
    }

    fn find_order_by_key(
        &self,
        buyer_id: UserId,
        idempotency_key: &str,
    ) -> Result<Option<Order>, StoreError> {
        block_on(self.fetch_order_by_key(buyer_id, idempotency_key))
    }

    fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError> {
        block_on(self.fetch_orders(filter))
    }

    fn commit(&self, unit: UnitOfWork) -> Result<(), StoreError> {
        block_on(self.commit_unit(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_enforces_escrow_and_stock_invariants() {
        assert!(SCHEMA.contains("CHECK (quantity >= 0)"));
        assert!(SCHEMA.contains("CHECK (escrow_locked = (status IN ('paid', 'shipped')))"));
        assert!(SCHEMA.contains(IDEMPOTENCY_INDEX));
    }

    #[test]
    fn out_of_range_values_are_backend_errors() {
        assert!(matches!(to_i64(u64::MAX, "price"), Err(StoreError::Backend(_))));
        assert!(matches!(to_u64(-1, "version"), Err(StoreError::Backend(_))));
    }

    #[test]
    fn sync_calls_outside_a_runtime_fail_cleanly() {
        let err = block_on(async { Ok::<_, StoreError>(()) }).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn sync_calls_on_a_current_thread_runtime_fail_cleanly() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let result = rt.block_on(async { block_on(async { Ok::<_, StoreError>(()) }) });
        match result {
            Err(StoreError::Backend(msg)) => assert!(msg.contains("multi-threaded")),
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[test]
    fn sync_calls_on_a_multi_thread_runtime_run_the_future() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let value = rt.block_on(async {
            tokio::spawn(async { block_on(async { Ok::<_, StoreError>(7) }) })
                .await
                .unwrap()
        });
        assert_eq!(value, Ok(7));
    }
}
