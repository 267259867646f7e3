//! Who may request which order transition.
//!
//! One static table, looked up by `(from, to)`. Admins bypass the table.
//! Requests along an edge the state machine does not declare are left to the
//! state machine, which rejects them as invalid transitions.

use serde::{Deserialize, Serialize};

use agrinet_auth::{Actor, AuthzError};

use crate::order::Order;
use crate::status::OrderStatus;

/// The actor's relationship to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Buyer,
    Seller,
    Admin,
}

impl Party {
    pub fn as_str(&self) -> &'static str {
        match self {
            Party::Buyer => "buyer",
            Party::Seller => "seller",
            Party::Admin => "admin",
        }
    }
}

/// `from` any of `from` to `to`, requested by any of `parties`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub name: &'static str,
    pub from: &'static [OrderStatus],
    pub to: OrderStatus,
    pub parties: &'static [Party],
}

const NON_TERMINAL: &[OrderStatus] = &[
    OrderStatus::Created,
    OrderStatus::Paid,
    OrderStatus::Shipped,
    OrderStatus::Disputed,
];

pub const RULES: &[Rule] = &[
    Rule {
        name: "pay",
        from: &[OrderStatus::Created],
        to: OrderStatus::Paid,
        parties: &[Party::Buyer],
    },
    Rule {
        name: "ship",
        from: &[OrderStatus::Paid],
        to: OrderStatus::Shipped,
        parties: &[Party::Seller],
    },
    Rule {
        name: "confirm_delivery",
        from: &[OrderStatus::Shipped],
        to: OrderStatus::Delivered,
        parties: &[Party::Buyer],
    },
    Rule {
        name: "open_dispute",
        from: &[OrderStatus::Created, OrderStatus::Paid, OrderStatus::Shipped],
        to: OrderStatus::Disputed,
        parties: &[Party::Buyer, Party::Seller],
    },
    Rule {
        name: "admin_refund",
        from: NON_TERMINAL,
        to: OrderStatus::Refunded,
        parties: &[Party::Admin],
    },
    Rule {
        name: "admin_release",
        from: NON_TERMINAL,
        to: OrderStatus::Delivered,
        parties: &[Party::Admin],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOutcome {
    Granted,
    Denied,
    /// Not a declared edge; the state machine decides.
    NotApplicable,
}

/// Audit record of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub parties: Vec<Party>,
    pub rule: Option<&'static str>,
    pub outcome: PolicyOutcome,
    pub reason: String,
}

impl PolicyDecision {
    pub fn is_denied(&self) -> bool {
        self.outcome == PolicyOutcome::Denied
    }
}

pub struct PermissionPolicy;

impl PermissionPolicy {
    pub fn rules() -> &'static [Rule] {
        RULES
    }

    /// Every role `actor` holds with respect to `order`. A user who bought
    /// their own listing is both buyer and seller.
    pub fn parties(actor: &Actor, order: &Order) -> Vec<Party> {
        let mut parties = Vec::with_capacity(2);
        if actor.is_admin() {
            parties.push(Party::Admin);
        }
        if actor.user_id == order.buyer_id() {
            parties.push(Party::Buyer);
        }
        if actor.user_id == order.seller_id() {
            parties.push(Party::Seller);
        }
        parties
    }

    pub fn authorize(actor: &Actor, order: &Order, to: OrderStatus) -> Result<(), AuthzError> {
        let decision = Self::explain(actor, order, to);
        if decision.is_denied() {
            return Err(AuthzError::forbidden(decision.reason));
        }
        Ok(())
    }

    pub fn explain(actor: &Actor, order: &Order, to: OrderStatus) -> PolicyDecision {
        let from = order.status();
        let parties = Self::parties(actor, order);
        let rule = RULES
            .iter()
            .find(|r| r.to == to && r.from.contains(&from) && r.parties.iter().any(|p| parties.contains(p)));

        let (outcome, reason) = if !from.can_transition_to(to) {
            (
                PolicyOutcome::NotApplicable,
                format!("{from} -> {to} is not a declared transition"),
            )
        } else if let Some(rule) = rule {
            (PolicyOutcome::Granted, format!("granted by rule '{}'", rule.name))
        } else if parties.contains(&Party::Admin) {
            (PolicyOutcome::Granted, "admin override".to_string())
        } else if parties.is_empty() {
            (
                PolicyOutcome::Denied,
                "actor is not a party to this order".to_string(),
            )
        } else {
            (
                PolicyOutcome::Denied,
                format!(
                    "{} may not move an order from {from} to {to}",
                    parties
                        .iter()
                        .map(Party::as_str)
                        .collect::<Vec<_>>()
                        .join("/")
                ),
            )
        };

        PolicyDecision {
            from,
            to,
            parties,
            rule: rule.map(|r| r.name),
            outcome,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrinet_core::{Aggregate, Money, OrderId, ProductId, UserId};
    use chrono::Utc;

    use crate::order::{ChangeStatus, OrderCommand, PlaceOrder};

    struct Fixture {
        buyer: Actor,
        seller: Actor,
        stranger: Actor,
        admin: Actor,
        order: Order,
    }

    fn fixture() -> Fixture {
        let buyer = Actor::member(UserId::new());
        let seller = Actor::member(UserId::new());
        let id = OrderId::new();
        let mut order = Order::empty(id);
        order
            .execute(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id: id,
                buyer_id: buyer.user_id,
                product_id: ProductId::new(),
                seller_id: seller.user_id,
                quantity: 1,
                unit_price: Money::from_minor(10),
                idempotency_key: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        Fixture {
            buyer,
            seller,
            stranger: Actor::member(UserId::new()),
            admin: Actor::admin(UserId::new()),
            order,
        }
    }

    fn advance(order: &mut Order, to: OrderStatus) {
        order
            .execute(&OrderCommand::ChangeStatus(ChangeStatus {
                order_id: order.id_typed(),
                to,
                occurred_at: Utc::now(),
            }))
            .unwrap();
    }

    #[test]
    fn buyer_pays_seller_does_not() {
        let f = fixture();
        assert!(PermissionPolicy::authorize(&f.buyer, &f.order, OrderStatus::Paid).is_ok());
        assert!(PermissionPolicy::authorize(&f.seller, &f.order, OrderStatus::Paid).is_err());
    }

    #[test]
    fn seller_ships_buyer_does_not() {
        let mut f = fixture();
        advance(&mut f.order, OrderStatus::Paid);
        assert!(PermissionPolicy::authorize(&f.seller, &f.order, OrderStatus::Shipped).is_ok());

        let err = PermissionPolicy::authorize(&f.buyer, &f.order, OrderStatus::Shipped).unwrap_err();
        assert!(matches!(err, AuthzError::Forbidden(_)));
    }

    #[test]
    fn only_admin_refunds() {
        let mut f = fixture();
        advance(&mut f.order, OrderStatus::Disputed);
        for actor in [&f.buyer, &f.seller, &f.stranger] {
            assert!(PermissionPolicy::authorize(actor, &f.order, OrderStatus::Refunded).is_err());
        }
        let decision = PermissionPolicy::explain(&f.admin, &f.order, OrderStatus::Refunded);
        assert_eq!(decision.outcome, PolicyOutcome::Granted);
        assert_eq!(decision.rule, Some("admin_refund"));
    }

    #[test]
    fn either_party_may_dispute() {
        let f = fixture();
        assert!(PermissionPolicy::authorize(&f.buyer, &f.order, OrderStatus::Disputed).is_ok());
        assert!(PermissionPolicy::authorize(&f.seller, &f.order, OrderStatus::Disputed).is_ok());
        assert!(PermissionPolicy::authorize(&f.stranger, &f.order, OrderStatus::Disputed).is_err());
    }

    #[test]
    fn buyer_cannot_skip_to_delivered() {
        let f = fixture();
        let decision = PermissionPolicy::explain(&f.buyer, &f.order, OrderStatus::Delivered);
        assert_eq!(decision.outcome, PolicyOutcome::Denied);

        let admin = PermissionPolicy::explain(&f.admin, &f.order, OrderStatus::Delivered);
        assert_eq!(admin.rule, Some("admin_release"));
    }

    #[test]
    fn undeclared_edges_are_left_to_the_state_machine() {
        let mut f = fixture();
        advance(&mut f.order, OrderStatus::Paid);
        advance(&mut f.order, OrderStatus::Shipped);
        advance(&mut f.order, OrderStatus::Delivered);

        for actor in [&f.buyer, &f.seller, &f.stranger, &f.admin] {
            let decision = PermissionPolicy::explain(actor, &f.order, OrderStatus::Paid);
            assert_eq!(decision.outcome, PolicyOutcome::NotApplicable);
        }
    }

    #[test]
    fn self_purchase_holds_both_parties() {
        let user = Actor::member(UserId::new());
        let id = OrderId::new();
        let mut order = Order::empty(id);
        order
            .execute(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id: id,
                buyer_id: user.user_id,
                product_id: ProductId::new(),
                seller_id: user.user_id,
                quantity: 1,
                unit_price: Money::from_minor(1),
                idempotency_key: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert_eq!(
            PermissionPolicy::parties(&user, &order),
            vec![Party::Buyer, Party::Seller]
        );
    }

    #[test]
    fn decision_serializes_for_audit_logs() {
        let f = fixture();
        let decision = PermissionPolicy::explain(&f.seller, &f.order, OrderStatus::Paid);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["outcome"], "denied");
        assert_eq!(json["parties"][0], "seller");
    }
}
