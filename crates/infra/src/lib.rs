//! Infrastructure layer: persistence, the order engine, the catalog and KYC
//! services, notifications and process wiring.

pub mod bootstrap;
pub mod catalog_service;
pub mod config;
pub mod engine;
pub mod kyc_service;
pub mod notify;
pub mod outbox;
pub mod store;

pub use bootstrap::{Market, SharedStore, bootstrap};
pub use catalog_service::CatalogService;
pub use config::{MarketConfig, StoreBackend};
pub use engine::{EngineConfig, EngineError, ErrorKind, OrderEngine};
pub use kyc_service::KycService;
pub use notify::{
    BusNotificationSink, InMemoryInbox, Notification, NotificationKind, NotificationSink,
    NotifyError, Recipient, TracingSink,
};
pub use outbox::{EnvelopePublisher, JsonEnvelope};
pub use store::{InMemoryMarketStore, MarketStore, OrderFilter, PostgresMarketStore, StoreError};
