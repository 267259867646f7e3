//! KYC gate: the "may this user list products" predicate and the only path
//! that flips `kyc_verified`.
//!
//! The identity check itself (face vs. ID document) is an external provider
//! behind [`KycVerifier`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use agrinet_core::{DomainError, DomainResult};

use crate::user::{User, UserEvent};

/// Evidence submitted for verification: an ID document and a selfie, each as
/// a URL or base64 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycDocuments {
    id_document: String,
    selfie: String,
}

impl KycDocuments {
    pub fn new(id_document: impl Into<String>, selfie: impl Into<String>) -> DomainResult<Self> {
        let id_document = id_document.into();
        let selfie = selfie.into();
        if id_document.trim().is_empty() || selfie.trim().is_empty() {
            return Err(DomainError::validation(
                "both id_document and selfie are required",
            ));
        }
        Ok(Self {
            id_document,
            selfie,
        })
    }

    pub fn id_document(&self) -> &str {
        &self.id_document
    }

    pub fn selfie(&self) -> &str {
        &self.selfie
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycOutcome {
    Approved,
    Rejected,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("kyc verifier unavailable: {0}")]
pub struct VerifierError(pub String);

/// External identity-verification provider.
pub trait KycVerifier: Send + Sync {
    fn verify(&self, documents: &KycDocuments) -> Result<KycOutcome, VerifierError>;
}

impl<V> KycVerifier for std::sync::Arc<V>
where
    V: KycVerifier + ?Sized,
{
    fn verify(&self, documents: &KycDocuments) -> Result<KycOutcome, VerifierError> {
        (**self).verify(documents)
    }
}

pub struct KycGate;

impl KycGate {
    /// Whether `user` may list products.
    pub fn is_allowed_to_list(user: &User) -> bool {
        user.is_kyc_verified()
    }

    pub fn ensure_allowed_to_list(user: &User) -> DomainResult<()> {
        if Self::is_allowed_to_list(user) {
            Ok(())
        } else {
            Err(DomainError::KycRequired)
        }
    }

    /// Apply a verifier outcome. Approval verifies the user and freezes the
    /// name; rejection changes nothing.
    pub fn apply(user: &mut User, outcome: KycOutcome) -> DomainResult<UserEvent> {
        match outcome {
            KycOutcome::Approved => user.mark_verified(),
            KycOutcome::Rejected => Err(DomainError::KycRejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrinet_core::UserId;

    struct Always(KycOutcome);

    impl KycVerifier for Always {
        fn verify(&self, _documents: &KycDocuments) -> Result<KycOutcome, VerifierError> {
            Ok(self.0)
        }
    }

    fn user() -> User {
        User::register(UserId::new(), "Ada").unwrap().0
    }

    fn docs() -> KycDocuments {
        KycDocuments::new("data:image/png;base64,AAAA", "data:image/png;base64,BBBB").unwrap()
    }

    #[test]
    fn documents_require_both_images() {
        assert!(KycDocuments::new("", "selfie").is_err());
        assert!(KycDocuments::new("id", " ").is_err());
    }

    #[test]
    fn approval_verifies_and_locks_name() {
        let mut user = user();
        let outcome = Always(KycOutcome::Approved).verify(&docs()).unwrap();

        let event = KycGate::apply(&mut user, outcome).unwrap();

        assert!(matches!(event, UserEvent::KycApproved(_)));
        assert!(KycGate::is_allowed_to_list(&user));
        assert!(user.is_name_locked());
    }

    #[test]
    fn rejection_leaves_user_untouched() {
        let mut user = user();
        let before = user.clone();

        assert!(KycGate::apply(&mut user, KycOutcome::Rejected).is_err());
        assert_eq!(user, before);
        assert_eq!(KycGate::ensure_allowed_to_list(&user), Err(DomainError::KycRequired));
    }

    #[test]
    fn approving_twice_is_a_conflict() {
        let mut user = user();
        KycGate::apply(&mut user, KycOutcome::Approved).unwrap();
        assert!(matches!(
            KycGate::apply(&mut user, KycOutcome::Approved),
            Err(DomainError::Conflict(_))
        ));
    }
}
