//! Product listing on behalf of a seller, and the buyer-facing catalog read.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::instrument;

use agrinet_accounts::User;
use agrinet_auth::Actor;
use agrinet_catalog::{AvailableProduct, CreateProduct, Product, ProductCommand, list_available};
use agrinet_core::{Aggregate, Money, ProductId, UserId};

use crate::engine::{EngineError, PRODUCT_AGGREGATE};
use crate::notify::{Notification, NotificationKind, NotificationSink, Recipient, TracingSink};
use crate::outbox::{Effects, EnvelopePublisher, Outbox};
use crate::store::{MarketStore, RowWrite, UnitOfWork};

/// In-stock products of verified sellers, newest first.
pub(crate) fn load_available<S>(store: &S) -> Result<Vec<AvailableProduct>, EngineError>
where
    S: MarketStore + ?Sized,
{
    let products = store.list_products()?;
    let owner_ids: Vec<UserId> = products
        .iter()
        .filter(|p| p.is_in_stock())
        .map(Product::owner_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let owners: HashMap<UserId, User> = store
        .load_users(&owner_ids)?
        .into_iter()
        .map(|u| (u.id_typed(), u))
        .collect();

    Ok(list_available(&products, |id| owners.get(&id)))
}

pub struct CatalogService<S> {
    store: S,
    effects: Effects,
}

impl<S> CatalogService<S>
where
    S: MarketStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            effects: Effects::new(Arc::new(TracingSink)),
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

    /// List a new product owned by `actor`. The owner must be KYC-verified.
    #[instrument(skip_all, fields(owner_id = %actor.user_id, quantity = quantity), err)]
    pub fn create_product(
        &self,
        actor: &Actor,
        name: &str,
        description: &str,
        price: Money,
        quantity: i64,
    ) -> Result<Product, EngineError> {
        let owner = self
            .store
            .load_user(actor.user_id)?
            .ok_or(EngineError::UserNotFound(actor.user_id))?;

        let product_id = ProductId::new();
        let mut product = Product::empty(product_id);
        let events = product.execute(&ProductCommand::CreateProduct(CreateProduct::for_owner(
            &owner,
            product_id,
            name,
            description,
            price,
            quantity,
        )))?;

        self.store
            .commit(UnitOfWork::new().with_product(RowWrite::insert(product.clone())))?;
        tracing::info!(product_id = %product_id, "product listed");

        let mut outbox = Outbox::new();
        outbox.record(*product_id.as_uuid(), PRODUCT_AGGREGATE, 1, &events);
        outbox.notify(Notification::new(
            Recipient::User(actor.user_id),
            NotificationKind::ProductListed,
            "Product listed successfully.",
        ));
        outbox.flush(&self.effects);

        Ok(product)
    }

    #[instrument(skip_all, err)]
    pub fn list_available(&self) -> Result<Vec<AvailableProduct>, EngineError> {
        load_available(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrinet_accounts::{KycGate, KycOutcome};
    use crate::notify::InMemoryInbox;
    use crate::store::InMemoryMarketStore;

    fn user(store: &InMemoryMarketStore, name: &str, verified: bool) -> User {
        let (mut user, _) = User::register(UserId::new(), name).unwrap();
        if verified {
            KycGate::apply(&mut user, KycOutcome::Approved).unwrap();
        }
        store
            .commit(UnitOfWork::new().with_user(RowWrite::insert(user.clone())))
            .unwrap();
        user
    }

    #[test]
    fn unverified_owner_cannot_list() {
        let store = Arc::new(InMemoryMarketStore::new());
        let owner = user(&store, "Bola", false);
        let catalog = CatalogService::new(store.clone());

        let err = catalog
            .create_product(&Actor::member(owner.id_typed()), "Yam", "", Money::from_minor(5), 3)
            .unwrap_err();
        assert_eq!(err, EngineError::KycRequired);
        assert!(store.list_products().unwrap().is_empty());
    }

    #[test]
    fn listing_notifies_the_owner_only_on_success() {
        let store = Arc::new(InMemoryMarketStore::new());
        let owner = user(&store, "Ada", true);
        let unverified = user(&store, "Eze", false);
        let inbox = Arc::new(InMemoryInbox::new());
        let catalog = CatalogService::new(store.clone()).with_notifier(inbox.clone());

        catalog
            .create_product(&Actor::member(owner.id_typed()), "Maize", "", Money::from_minor(4), 9)
            .unwrap();
        let received = inbox.inbox(owner.id_typed());
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, NotificationKind::ProductListed);
        assert_eq!(received[0].message, "Product listed successfully.");

        catalog
            .create_product(&Actor::member(unverified.id_typed()), "Maize", "", Money::from_minor(4), 9)
            .unwrap_err();
        assert!(inbox.inbox(unverified.id_typed()).is_empty());
    }

    #[test]
    fn unknown_owner_is_not_found() {
        let catalog = CatalogService::new(InMemoryMarketStore::new());
        let id = UserId::new();
        assert_eq!(
            catalog
                .create_product(&Actor::member(id), "Yam", "", Money::from_minor(5), 3)
                .unwrap_err(),
            EngineError::UserNotFound(id)
        );
    }

    #[test]
    fn listing_shows_verified_in_stock_products_with_seller_name() {
        let store = Arc::new(InMemoryMarketStore::new());
        let owner = user(&store, "Chidi", true);
        let catalog = CatalogService::new(store.clone());
        let actor = Actor::member(owner.id_typed());

        let yam = catalog
            .create_product(&actor, "Yam", "tubers", Money::from_minor(5), 3)
            .unwrap();
        catalog
            .create_product(&actor, "Okra", "", Money::from_minor(2), 0)
            .unwrap();

        let listed = catalog.list_available().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].product_id, yam.id_typed());
        assert_eq!(listed[0].seller_name, "Chidi");
    }
}
