use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agrinet_accounts::User;
use agrinet_core::{Aggregate, AggregateRoot, DomainError, Money, ProductId, UserId};
use agrinet_events::Event;

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    owner_id: UserId,
    name: String,
    description: String,
    price: Money,
    quantity: i64,
    listed_at: DateTime<Utc>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-listed instance (target of `CreateProduct`).
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            owner_id: UserId::from_uuid(Uuid::nil()),
            name: String::new(),
            description: String::new(),
            price: Money::ZERO,
            quantity: 0,
            listed_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
            created: false,
        }
    }

    /// Rebuild a product from its persisted row.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ProductId,
        owner_id: UserId,
        name: String,
        description: String,
        price: Money,
        quantity: i64,
        listed_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            owner_id,
            name,
            description,
            price,
            quantity,
            listed_at,
            version,
            created: true,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn listed_at(&self) -> DateTime<Utc> {
        self.listed_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_in_stock(&self) -> bool {
        self.quantity > 0
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub owner_id: UserId,
    /// Snapshot of the owner's verification flag at command time.
    pub owner_kyc_verified: bool,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

impl CreateProduct {
    pub fn for_owner(
        owner: &User,
        product_id: ProductId,
        name: impl Into<String>,
        description: impl Into<String>,
        price: Money,
        quantity: i64,
    ) -> Self {
        Self {
            product_id,
            owner_id: owner.id_typed(),
            owner_kyc_verified: owner.is_kyc_verified(),
            name: name.into(),
            description: description.into(),
            price,
            quantity,
            occurred_at: Utc::now(),
        }
    }
}

/// Command: ReserveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock (compensates a reservation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
}

/// Event: ProductListed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductListed {
    pub product_id: ProductId,
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub product_id: ProductId,
    pub quantity: i64,
    pub remaining: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub product_id: ProductId,
    pub quantity: i64,
    pub remaining: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductListed(ProductListed),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductListed(_) => "catalog.product.listed",
            ProductEvent::StockReserved(_) => "catalog.product.stock_reserved",
            ProductEvent::StockReleased(_) => "catalog.product.stock_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductListed(e) => e.occurred_at,
            ProductEvent::StockReserved(e) => e.occurred_at,
            ProductEvent::StockReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductListed(e) => {
                self.id = e.product_id;
                self.owner_id = e.owner_id;
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.price = e.price;
                self.quantity = e.quantity;
                self.listed_at = e.occurred_at;
                self.created = true;
            }
            ProductEvent::StockReserved(e) => {
                self.quantity = e.remaining;
            }
            ProductEvent::StockReleased(e) => {
                self.quantity = e.remaining;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            ProductCommand::ReleaseStock(cmd) => self.handle_release(cmd),
        }
    }
}

impl Product {
    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if !cmd.owner_kyc_verified {
            return Err(DomainError::KycRequired);
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }

        Ok(vec![ProductEvent::ProductListed(ProductListed {
            product_id: cmd.product_id,
            owner_id: cmd.owner_id,
            name: cmd.name.trim().to_string(),
            description: cmd.description.clone(),
            price: cmd.price,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(cmd.product_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.quantity > self.quantity {
            return Err(DomainError::insufficient_stock(cmd.quantity, self.quantity));
        }

        Ok(vec![ProductEvent::StockReserved(StockReserved {
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            remaining: self.quantity - cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(cmd.product_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        let remaining = self
            .quantity
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::invariant("stock overflow"))?;

        Ok(vec![ProductEvent::StockReleased(StockReleased {
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            remaining,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(quantity: i64) -> Product {
        let id = ProductId::new();
        let mut product = Product::empty(id);
        product
            .execute(&ProductCommand::CreateProduct(CreateProduct {
                product_id: id,
                owner_id: UserId::new(),
                owner_kyc_verified: true,
                name: "Yam tubers".to_string(),
                description: "50kg bag".to_string(),
                price: Money::from_minor(10),
                quantity,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        product
    }

    fn reserve(product: &Product, quantity: i64) -> ProductCommand {
        ProductCommand::ReserveStock(ReserveStock {
            product_id: product.id_typed(),
            quantity,
            occurred_at: Utc::now(),
        })
    }

    fn release(product: &Product, quantity: i64) -> ProductCommand {
        ProductCommand::ReleaseStock(ReleaseStock {
            product_id: product.id_typed(),
            quantity,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn unverified_owner_cannot_list() {
        let id = ProductId::new();
        let product = Product::empty(id);
        let err = product
            .handle(&ProductCommand::CreateProduct(CreateProduct {
                product_id: id,
                owner_id: UserId::new(),
                owner_kyc_verified: false,
                name: "Cassava".to_string(),
                description: String::new(),
                price: Money::from_minor(5),
                quantity: 3,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::KycRequired);
    }

    #[test]
    fn reserve_decrements_quantity() {
        let mut product = listed(5);
        let events = product.execute(&reserve(&product, 2)).unwrap();

        assert_eq!(product.quantity(), 3);
        assert_eq!(product.version(), 2);
        match &events[0] {
            ProductEvent::StockReserved(e) => assert_eq!(e.remaining, 3),
            _ => panic!("Expected StockReserved event"),
        }
    }

    #[test]
    fn reserve_more_than_available_fails() {
        let product = listed(1);
        let err = product.handle(&reserve(&product, 2)).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(2, 1));
    }

    #[test]
    fn reserve_from_empty_stock_fails() {
        let product = listed(0);
        assert!(matches!(
            product.handle(&reserve(&product, 1)),
            Err(DomainError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn release_restores_quantity() {
        let mut product = listed(5);
        product.execute(&reserve(&product, 4)).unwrap();
        product.execute(&release(&product, 4)).unwrap();
        assert_eq!(product.quantity(), 5);
    }

    #[test]
    fn non_positive_quantities_rejected() {
        let product = listed(5);
        assert!(matches!(product.handle(&reserve(&product, 0)), Err(DomainError::Validation(_))));
        assert!(matches!(product.handle(&release(&product, -1)), Err(DomainError::Validation(_))));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let product = listed(5);
        let before = product.clone();
        let events1 = product.handle(&reserve(&product, 1)).unwrap();
        let events2 = product.handle(&reserve(&product, 1)).unwrap();
        assert_eq!(product, before);
        assert_eq!(events1.len(), events2.len());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: no sequence of reserve/release leaves negative stock.
            #[test]
            fn quantity_never_negative(
                initial in 0i64..50,
                ops in proptest::collection::vec((any::<bool>(), 1i64..20), 0..40)
            ) {
                let mut product = listed(initial);
                for (is_reserve, qty) in ops {
                    let cmd = if is_reserve { reserve(&product, qty) } else { release(&product, qty) };
                    let _ = product.execute(&cmd);
                    prop_assert!(product.quantity() >= 0);
                }
            }
        }
    }
}
