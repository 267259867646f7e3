//! Persistence for users, products and orders.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryMarketStore;
pub use postgres::PostgresMarketStore;
pub use r#trait::{MarketStore, OrderFilter, RowWrite, StoreError, UnitOfWork};
