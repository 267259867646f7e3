//! Buyer-facing product listing.

use serde::{Deserialize, Serialize};

use agrinet_accounts::{KycGate, User};
use agrinet_core::{Money, ProductId, UserId};

use crate::product::Product;

/// A product row enriched with its seller's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableProduct {
    pub product_id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub quantity: i64,
    pub seller_id: UserId,
    pub seller_name: String,
}

/// Products with stock left whose seller is still verified, newest first.
///
/// `seller` resolves an owner id; products whose owner cannot be resolved are
/// skipped.
pub fn list_available<'a, F>(
    products: impl IntoIterator<Item = &'a Product>,
    seller: F,
) -> Vec<AvailableProduct>
where
    F: Fn(UserId) -> Option<&'a User>,
{
    let mut listed: Vec<(&Product, &User)> = products
        .into_iter()
        .filter(|p| p.is_in_stock())
        .filter_map(|p| seller(p.owner_id()).map(|u| (p, u)))
        .filter(|(_, u)| KycGate::is_allowed_to_list(u))
        .collect();

    listed.sort_by(|(a, _), (b, _)| {
        b.listed_at()
            .cmp(&a.listed_at())
            .then_with(|| b.id_typed().cmp(&a.id_typed()))
    });

    listed
        .into_iter()
        .map(|(p, u)| AvailableProduct {
            product_id: p.id_typed(),
            name: p.name().to_string(),
            description: p.description().to_string(),
            price: p.price(),
            quantity: p.quantity(),
            seller_id: u.id_typed(),
            seller_name: u.name().to_string(),
        })
        .collect()
}
