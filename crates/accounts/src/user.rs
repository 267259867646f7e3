use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agrinet_auth::Role;
use agrinet_core::{DomainError, DomainResult, Entity, UserId};
use agrinet_events::Event;

/// Marketplace user as seen by the catalog and order engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    name: String,
    role: Role,
    kyc_verified: bool,
    /// Set together with `kyc_verified`; the verified identity owns the name.
    name_locked: bool,
    version: u64,
}

impl User {
    /// Register a new, unverified buyer/seller.
    pub fn register(id: UserId, name: impl Into<String>) -> DomainResult<(Self, UserEvent)> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let user = Self {
            id,
            name: name.clone(),
            role: Role::BuyerOrSeller,
            kyc_verified: false,
            name_locked: false,
            version: 1,
        };
        let event = UserEvent::UserRegistered(UserRegistered {
            user_id: id,
            name,
            occurred_at: Utc::now(),
        });
        Ok((user, event))
    }

    /// Rebuild a user from its persisted row.
    pub fn restore(
        id: UserId,
        name: String,
        role: Role,
        kyc_verified: bool,
        name_locked: bool,
        version: u64,
    ) -> Self {
        Self {
            id,
            name,
            role,
            kyc_verified,
            name_locked,
            version,
        }
    }

    pub fn id_typed(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_kyc_verified(&self) -> bool {
        self.kyc_verified
    }

    pub fn is_name_locked(&self) -> bool {
        self.name_locked
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Profile update. Refused once KYC has frozen the name.
    pub fn rename(&mut self, new_name: impl Into<String>) -> DomainResult<UserEvent> {
        if self.name_locked {
            return Err(DomainError::validation("name is locked after kyc verification"));
        }
        let new_name = new_name.into();
        if new_name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        self.name = new_name.clone();
        self.version += 1;
        Ok(UserEvent::NameChanged(NameChanged {
            user_id: self.id,
            name: new_name,
            occurred_at: Utc::now(),
        }))
    }

    /// Only reachable through [`crate::KycGate`].
    pub(crate) fn mark_verified(&mut self) -> DomainResult<UserEvent> {
        if self.kyc_verified {
            return Err(DomainError::conflict("user is already kyc verified"));
        }
        self.kyc_verified = true;
        self.name_locked = true;
        self.version += 1;
        Ok(UserEvent::KycApproved(KycApproved {
            user_id: self.id,
            locked_name: self.name.clone(),
            occurred_at: Utc::now(),
        }))
    }

    /// Role changes are admin operations; the caller checks the admin guard.
    pub fn assign_role(&mut self, role: Role) -> DomainResult<UserEvent> {
        if self.role == role {
            return Err(DomainError::validation(format!("user already has role '{role}'")));
        }
        self.role = role;
        self.version += 1;
        Ok(UserEvent::RoleAssigned(RoleAssigned {
            user_id: self.id,
            role,
            occurred_at: Utc::now(),
        }))
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegistered {
    pub user_id: UserId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameChanged {
    pub user_id: UserId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycApproved {
    pub user_id: UserId,
    pub locked_name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssigned {
    pub user_id: UserId,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEvent {
    UserRegistered(UserRegistered),
    NameChanged(NameChanged),
    KycApproved(KycApproved),
    RoleAssigned(RoleAssigned),
}

impl Event for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::UserRegistered(_) => "accounts.user.registered",
            UserEvent::NameChanged(_) => "accounts.user.name_changed",
            UserEvent::KycApproved(_) => "accounts.user.kyc_approved",
            UserEvent::RoleAssigned(_) => "accounts.user.role_assigned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::UserRegistered(e) => e.occurred_at,
            UserEvent::NameChanged(e) => e.occurred_at,
            UserEvent::KycApproved(e) => e.occurred_at,
            UserEvent::RoleAssigned(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(name: &str) -> User {
        User::register(UserId::new(), name).unwrap().0
    }

    #[test]
    fn register_starts_unverified_member() {
        let user = registered("Ada Farms");
        assert_eq!(user.role(), Role::BuyerOrSeller);
        assert!(!user.is_kyc_verified());
        assert!(!user.is_name_locked());
        assert_eq!(user.version(), 1);
    }

    #[test]
    fn register_rejects_blank_name() {
        assert!(matches!(
            User::register(UserId::new(), "   "),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rename_allowed_before_verification() {
        let mut user = registered("Ada");
        user.rename("Ada Farms Ltd").unwrap();
        assert_eq!(user.name(), "Ada Farms Ltd");
        assert_eq!(user.version(), 2);
    }

    #[test]
    fn verification_freezes_name() {
        let mut user = registered("Ada");
        user.mark_verified().unwrap();

        let err = user.rename("Someone Else").unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("locked") => {}
            other => panic!("expected locked-name validation error, got {other:?}"),
        }
        assert_eq!(user.name(), "Ada");
    }

    #[test]
    fn assign_same_role_is_rejected() {
        let mut user = registered("Ada");
        assert!(user.assign_role(Role::BuyerOrSeller).is_err());
        user.assign_role(Role::Admin).unwrap();
        assert_eq!(user.role(), Role::Admin);
    }
}
