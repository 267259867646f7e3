//! Process wiring: tracing, store, event bus, inbox and services.

use std::sync::Arc;

use anyhow::{Context, bail};

use agrinet_events::InMemoryEventBus;

use crate::catalog_service::CatalogService;
use crate::config::{MarketConfig, StoreBackend};
use crate::engine::OrderEngine;
use crate::kyc_service::KycService;
use crate::notify::InMemoryInbox;
use crate::outbox::JsonEnvelope;
use crate::store::{InMemoryMarketStore, MarketStore, PostgresMarketStore};

pub type SharedStore = Arc<dyn MarketStore>;

/// Everything a front end needs, sharing one store.
pub struct Market {
    pub store: SharedStore,
    pub orders: OrderEngine<SharedStore>,
    pub catalog: CatalogService<SharedStore>,
    pub kyc: KycService<SharedStore>,
    pub inbox: Arc<InMemoryInbox>,
    pub events: Arc<InMemoryEventBus<JsonEnvelope>>,
}

impl Market {
    /// Wire services over an already-built store.
    pub fn with_store(store: SharedStore, config: &MarketConfig) -> Self {
        let inbox = Arc::new(InMemoryInbox::with_capacity(config.inbox_capacity));
        let events: Arc<InMemoryEventBus<JsonEnvelope>> = Arc::new(InMemoryEventBus::new());

        let orders = OrderEngine::new(store.clone())
            .with_config(config.engine)
            .with_notifier(inbox.clone())
            .with_publisher(events.clone());
        let catalog = CatalogService::new(store.clone())
            .with_notifier(inbox.clone())
            .with_publisher(events.clone());
        let kyc = KycService::new(store.clone())
            .with_config(config.engine)
            .with_notifier(inbox.clone())
            .with_publisher(events.clone());

        Self {
            store,
            orders,
            catalog,
            kyc,
            inbox,
            events,
        }
    }
}

/// Initialize tracing and build the market described by `config`.
///
/// The Postgres backend needs a multi-threaded tokio runtime.
pub async fn bootstrap(config: MarketConfig) -> anyhow::Result<Market> {
    agrinet_observability::init(config.log_format);

    let store: SharedStore = match config.store {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; state is lost on exit");
            Arc::new(InMemoryMarketStore::new())
        }
        StoreBackend::Postgres => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL must be set when AGRINET_STORE=postgres");
            };
            let store = PostgresMarketStore::connect(url)
                .await
                .context("failed to connect to Postgres")?;
            Arc::new(store)
        }
    };

    tracing::info!(
        store = ?config.store,
        max_conflict_retries = config.engine.max_conflict_retries,
        inbox_capacity = config.inbox_capacity,
        "market ready"
    );
    Ok(Market::with_store(store, &config))
}
