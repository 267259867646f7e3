//! Simulated escrow: a flag on the order row, derived from its status.
//!
//! There is no separate balance. Funds count as held while the order is
//! `paid` or `shipped`, and released on `delivered` or `refunded`.

use serde::{Deserialize, Serialize};

use crate::order::Order;
use crate::status::OrderStatus;

/// What a transition does to the escrow flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEffect {
    /// Funds become held.
    Lock,
    /// Held funds are released.
    Release,
    /// Funds stay held.
    Hold,
    /// Nothing held before or after.
    None,
}

pub struct EscrowLedger;

impl EscrowLedger {
    pub fn locked(status: OrderStatus) -> bool {
        matches!(status, OrderStatus::Paid | OrderStatus::Shipped)
    }

    pub fn effect(from: OrderStatus, to: OrderStatus) -> EscrowEffect {
        match (Self::locked(from), Self::locked(to)) {
            (false, true) => EscrowEffect::Lock,
            (true, false) => EscrowEffect::Release,
            (true, true) => EscrowEffect::Hold,
            (false, false) => EscrowEffect::None,
        }
    }

    /// Flag value after applying `effect` to `current`.
    pub fn apply(current: bool, effect: EscrowEffect) -> bool {
        match effect {
            EscrowEffect::Lock => true,
            EscrowEffect::Release => false,
            EscrowEffect::Hold | EscrowEffect::None => current,
        }
    }

    /// Hold the order's funds (on payment).
    pub fn lock(order: &mut Order) {
        order.set_escrow_locked(true);
    }

    /// Release the order's funds (on delivery or refund).
    pub fn release(order: &mut Order) {
        order.set_escrow_locked(false);
    }
}
