//! Catalog domain module: products and their stock.
//!
//! Deterministic domain logic only (no IO, no HTTP, no storage). Stock is
//! mutated exclusively through reserve/release so `quantity >= 0` holds for
//! every committed product.

pub mod listing;
pub mod product;

pub use listing::{AvailableProduct, list_available};
pub use product::{
    CreateProduct, Product, ProductCommand, ProductEvent, ProductListed, ReleaseStock,
    ReserveStock, StockReleased, StockReserved,
};
