//! Orders domain module: the order lifecycle, its escrow flag and who may move
//! an order between states.
//!
//! Deterministic domain logic only. Persistence and the cross-aggregate unit
//! of work (order + product stock) live in `agrinet-infra`.

pub mod escrow;
pub mod order;
pub mod policy;
pub mod status;

pub use escrow::{EscrowEffect, EscrowLedger};
pub use order::{
    ChangeStatus, Order, OrderCommand, OrderEvent, OrderPlaced, OrderStatusChanged, PlaceOrder,
};
pub use policy::{Party, PermissionPolicy, PolicyDecision, PolicyOutcome, Rule};
pub use status::OrderStatus;
