//! User registration, KYC submission and the admin account operations.

use std::sync::Arc;

use tracing::instrument;

use agrinet_accounts::{KycDocuments, KycGate, KycOutcome, KycVerifier, User, UserEvent};
use agrinet_auth::{Actor, Role, require_admin};
use agrinet_core::UserId;

use crate::engine::{EngineConfig, EngineError, with_conflict_retries};
use crate::notify::{Notification, NotificationKind, NotificationSink, Recipient, TracingSink};
use crate::outbox::{Effects, EnvelopePublisher, Outbox};
use crate::store::{MarketStore, RowWrite, UnitOfWork};

pub const USER_AGGREGATE: &str = "accounts.user";

pub struct KycService<S> {
    store: S,
    effects: Effects,
    config: EngineConfig,
}

impl<S> KycService<S>
where
    S: MarketStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            effects: Effects::new(Arc::new(TracingSink)),
            config: EngineConfig::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.effects.notifier = notifier;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EnvelopePublisher>) -> Self {
        self.effects.publisher = Some(publisher);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Create the marketplace profile for a user the auth gate has just signed up.
    #[instrument(skip_all, fields(user_id = %user_id), err)]
    pub fn register_user(&self, user_id: UserId, name: &str) -> Result<User, EngineError> {
        let (user, event) = User::register(user_id, name)?;
        self.store
            .commit(UnitOfWork::new().with_user(RowWrite::insert(user.clone())))?;

        let mut outbox = Outbox::new();
        outbox.record(*user_id.as_uuid(), USER_AGGREGATE, user.version(), &[event]);
        outbox.flush(&self.effects);
        Ok(user)
    }

    /// Send `documents` to the verifier and apply its verdict.
    ///
    /// A verifier that cannot be reached counts as a rejection.
    #[instrument(skip_all, fields(user_id = %actor.user_id), err)]
    pub fn submit(
        &self,
        actor: &Actor,
        documents: &KycDocuments,
        verifier: &dyn KycVerifier,
    ) -> Result<User, EngineError> {
        let outcome = verifier.verify(documents).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "kyc verifier failed; treating as rejected");
            KycOutcome::Rejected
        });
        tracing::info!(?outcome, "kyc verdict");
        self.apply_outcome(actor.user_id, outcome)
    }

    /// Manual approval from the admin console.
    #[instrument(skip_all, fields(admin_id = %admin.user_id, user_id = %user_id), err)]
    pub fn approve_kyc(&self, admin: &Actor, user_id: UserId) -> Result<User, EngineError> {
        require_admin(admin, "approve_kyc")?;
        self.apply_outcome(user_id, KycOutcome::Approved)
    }

    #[instrument(skip_all, fields(admin_id = %admin.user_id, user_id = %user_id, role = %role), err)]
    pub fn assign_role(&self, admin: &Actor, user_id: UserId, role: Role) -> Result<User, EngineError> {
        require_admin(admin, "assign_role")?;
        let (user, _) = self.update(user_id, |user| user.assign_role(role).map_err(EngineError::from))?;
        Ok(user)
    }

    /// Profile name change; refused once KYC has locked the name.
    #[instrument(skip_all, fields(user_id = %actor.user_id), err)]
    pub fn rename(&self, actor: &Actor, name: &str) -> Result<User, EngineError> {
        let (user, _) = self.update(actor.user_id, |user| user.rename(name).map_err(EngineError::from))?;
        Ok(user)
    }

    pub fn user(&self, user_id: UserId) -> Result<User, EngineError> {
        self.store
            .load_user(user_id)?
            .ok_or(EngineError::UserNotFound(user_id))
    }

    fn apply_outcome(&self, user_id: UserId, outcome: KycOutcome) -> Result<User, EngineError> {
        let (user, _) = self.update(user_id, |user| {
            KycGate::apply(user, outcome).map_err(EngineError::from)
        })?;

        let mut outbox = Outbox::new();
        outbox.notify(Notification::new(
            Recipient::User(user_id),
            NotificationKind::KycApproved,
            "KYC approved",
        ));
        outbox.flush(&self.effects);
        Ok(user)
    }

    /// Load, mutate and commit one user row, re-reading on a stale version.
    fn update(
        &self,
        user_id: UserId,
        change: impl Fn(&mut User) -> Result<UserEvent, EngineError>,
    ) -> Result<(User, UserEvent), EngineError> {
        let (user, event) = with_conflict_retries(self.config.max_conflict_retries, "update_user", || {
            let mut user = self.user(user_id)?;
            let read_version = user.version();
            let event = change(&mut user)?;
            self.store
                .commit(UnitOfWork::new().with_user(RowWrite::update(user.clone(), read_version)))?;
            Ok((user, event))
        })?;

        let mut outbox = Outbox::new();
        outbox.record(*user_id.as_uuid(), USER_AGGREGATE, user.version(), std::slice::from_ref(&event));
        outbox.flush(&self.effects);
        Ok((user, event))
    }
}
