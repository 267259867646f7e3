use core::str::FromStr;

use serde::{Deserialize, Serialize};

use agrinet_core::DomainError;

/// Order lifecycle.
///
/// ```text
/// created ──► paid ──► shipped ──► delivered
///    │          │         │
///    └──────────┴─────────┴──► disputed ──► refunded
/// ```
///
/// `delivered` and `refunded` are terminal. Admin overrides add
/// `* → delivered` and `* → refunded` from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Paid,
    Shipped,
    Delivered,
    Disputed,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Created,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Disputed,
        OrderStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Disputed => "disputed",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Refunded)
    }

    /// Whether `self → target` is a declared edge. Same-state requests are
    /// never legal.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, target),
            (Created, Paid)
                | (Created, Disputed)
                | (Created, Refunded)
                | (Created, Delivered)
                | (Paid, Shipped)
                | (Paid, Disputed)
                | (Paid, Refunded)
                | (Paid, Delivered)
                | (Shipped, Delivered)
                | (Shipped, Disputed)
                | (Shipped, Refunded)
                | (Disputed, Refunded)
                | (Disputed, Delivered)
        )
    }

    /// Legal targets from this status.
    pub fn next_states(&self) -> Vec<OrderStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| self.can_transition_to(*s))
            .collect()
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for status in OrderStatus::ALL {
            if status.is_terminal() {
                assert!(status.next_states().is_empty(), "{status} should be terminal");
            }
        }
    }

    #[test]
    fn no_state_transitions_to_itself() {
        for status in OrderStatus::ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn happy_path_is_legal() {
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));
    }

    #[test]
    fn nothing_goes_back_to_created_or_paid() {
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Disputed.can_transition_to(OrderStatus::Shipped));
        for status in OrderStatus::ALL {
            assert!(!status.can_transition_to(OrderStatus::Created));
        }
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
        assert!("cancelled".parse::<OrderStatus>().is_err());
    }
}
