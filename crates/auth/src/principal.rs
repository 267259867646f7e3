use serde::{Deserialize, Serialize};

use agrinet_core::UserId;

use crate::Role;

/// The authenticated caller of an operation, as supplied by the auth gate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn member(user_id: UserId) -> Self {
        Self::new(user_id, Role::BuyerOrSeller)
    }

    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}
