use thiserror::Error;

use crate::Actor;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl AuthzError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }
}

/// Guard for admin-only operations (role assignment, manual KYC approval).
pub fn require_admin(actor: &Actor, operation: &str) -> Result<(), AuthzError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AuthzError::forbidden(format!("{operation} requires admin")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrinet_core::UserId;

    #[test]
    fn only_admins_pass() {
        assert!(require_admin(&Actor::admin(UserId::new()), "assign_role").is_ok());

        let err = require_admin(&Actor::member(UserId::new()), "assign_role").unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("assign_role requires admin".to_string()));
    }
}
