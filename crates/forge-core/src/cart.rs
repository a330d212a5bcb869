//! # Cart Aggregator
//!
//! Merges catalog rows and custom-build rows into the sellable lines of one
//! checkout. Validation is all-or-nothing: the first unavailable item aborts
//! the whole aggregation and is named in the error.

use crate::configuration::Configuration;
use crate::error::{ShopError, ShopResult, UnavailableReason};
use crate::order::{line_total, sum_amounts};
use crate::quote::quote_configuration;
use crate::settings::SettingsSnapshot;
use crate::store::ShopStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Id prefix marking a cart row as a configured build
pub const CUSTOM_ITEM_PREFIX: &str = "custom-";

/// A cart row, persisted per user or held client-side for guests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub quantity: u32,
    /// Unit price recorded when the row was added
    #[serde(default)]
    pub unit_price: i64,
    #[serde(default)]
    pub title: String,
    /// Catalog product; defaults to `id` for catalog rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    /// Build snapshot for custom rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Configuration>,
}

impl CartItem {
    /// Catalog row
    pub fn product(product_id: impl Into<String>, quantity: u32) -> Self {
        let product_id = product_id.into();
        Self {
            id: product_id.clone(),
            quantity,
            unit_price: 0,
            title: String::new(),
            product_id: Some(product_id),
            configuration: None,
        }
    }

    /// Custom-build row with a fresh id
    pub fn custom(configuration: Configuration, quantity: u32) -> Self {
        Self {
            id: format!("{}{}", CUSTOM_ITEM_PREFIX, Uuid::new_v4()),
            quantity,
            unit_price: 0,
            title: String::new(),
            product_id: None,
            configuration: Some(configuration),
        }
    }

    /// Builder: recorded unit price
    pub fn with_recorded_price(mut self, unit_price: i64) -> Self {
        self.unit_price = unit_price;
        self
    }

    /// Builder: title snapshot
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn is_custom(&self) -> bool {
        self.id.starts_with(CUSTOM_ITEM_PREFIX)
    }

    pub fn product_ref(&self) -> &str {
        self.product_id.as_deref().unwrap_or(&self.id)
    }

    fn display_name(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

/// Where the rows come from
#[derive(Debug, Clone)]
pub enum CartSource {
    /// Persisted cart of an authenticated user
    User(String),
    /// Rows submitted by a guest
    Guest(Vec<CartItem>),
}

impl CartSource {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            CartSource::User(id) => Some(id),
            CartSource::Guest(_) => None,
        }
    }
}

/// How recorded prices of custom-build rows are treated. Catalog rows
/// always use their recorded price when positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomPricePolicy {
    /// Always price builds from the current catalog
    #[default]
    Recompute,
    /// Use the recorded price when positive, otherwise recompute
    PreferRecorded,
}

impl FromStr for CustomPricePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recompute" => Ok(CustomPricePolicy::Recompute),
            "prefer_recorded" => Ok(CustomPricePolicy::PreferRecorded),
            other => Err(format!("unknown custom price policy: {}", other)),
        }
    }
}

/// Where a sellable line's unit price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Catalog,
    Recorded,
    Recomputed,
}

/// A validated cart line in base currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellableLine {
    pub item_id: String,
    /// Catalog product backing this line; `None` for custom builds
    pub product_id: Option<String>,
    pub name: String,
    pub description: String,
    pub unit_price: i64,
    pub quantity: u32,
    pub image_url: Option<String>,
    pub price_source: PriceSource,
}

impl SellableLine {
    pub fn total(&self) -> ShopResult<i64> {
        line_total(self.unit_price, self.quantity)
    }
}

/// Output of a successful aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedCart {
    pub lines: Vec<SellableLine>,
    pub free_shipping: bool,
}

impl AggregatedCart {
    pub fn total(&self) -> ShopResult<i64> {
        sum_amounts(self.lines.iter().map(SellableLine::total))
    }

    /// Purchased quantity per catalog product, in first-seen order
    pub fn stock_quantities(&self) -> Vec<(String, u32)> {
        let mut out: Vec<(String, u32)> = Vec::new();
        for line in &self.lines {
            let Some(product_id) = &line.product_id else {
                continue;
            };
            match out.iter_mut().find(|(id, _)| id == product_id) {
                Some((_, qty)) => *qty += line.quantity,
                None => out.push((product_id.clone(), line.quantity)),
            }
        }
        out
    }

    pub fn summary(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("{} x{}", l.name, l.quantity))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn unavailable(item: &CartItem, reason: UnavailableReason) -> ShopError {
    ShopError::CartUnavailable {
        item_id: item.id.clone(),
        item: item.display_name().to_string(),
        reason,
    }
}

/// Turns cart rows into sellable lines against the current catalog
pub struct CartAggregator<'a> {
    store: &'a dyn ShopStore,
    policy: CustomPricePolicy,
}

impl<'a> CartAggregator<'a> {
    pub fn new(store: &'a dyn ShopStore, policy: CustomPricePolicy) -> Self {
        Self { store, policy }
    }

    #[instrument(skip_all, fields(user_id = source.user_id(), policy = ?self.policy))]
    pub async fn aggregate(
        &self,
        source: &CartSource,
        settings: &SettingsSnapshot,
        locale: &str,
    ) -> ShopResult<AggregatedCart> {
        let items = match source {
            CartSource::User(user_id) => self.store.cart_items(user_id).await?,
            CartSource::Guest(items) => items.clone(),
        };
        if items.is_empty() {
            return Err(ShopError::InvalidRequest("cart is empty".to_string()));
        }
        if let Some(item) = items.iter().find(|i| i.quantity == 0) {
            return Err(ShopError::InvalidRequest(format!(
                "cart item {} has zero quantity",
                item.id
            )));
        }

        // Stock is checked against the total requested per product
        let mut requested: HashMap<&str, u32> = HashMap::new();
        for item in items.iter().filter(|i| !i.is_custom()) {
            *requested.entry(item.product_ref()).or_default() += item.quantity;
        }

        let mut lines = Vec::with_capacity(items.len());
        let mut all_catalog_free = true;
        let mut has_custom = false;

        for item in &items {
            if item.is_custom() {
                has_custom = true;
                lines.push(self.custom_line(item, settings, locale).await?);
                continue;
            }

            let product = self
                .store
                .product(item.product_ref())
                .await?
                .ok_or_else(|| unavailable(item, UnavailableReason::NotFound))?;
            if !product.active {
                return Err(unavailable(item, UnavailableReason::Inactive));
            }
            let wanted = requested.get(item.product_ref()).copied().unwrap_or(item.quantity);
            if wanted > product.stock {
                return Err(unavailable(
                    item,
                    UnavailableReason::InsufficientStock {
                        requested: wanted,
                        available: product.stock,
                    },
                ));
            }

            // Catalog rows keep the price snapshot taken when they were added
            let (unit_price, price_source) = if item.unit_price > 0 {
                (item.unit_price, PriceSource::Recorded)
            } else {
                (product.price, PriceSource::Catalog)
            };
            all_catalog_free &= product.free_shipping;

            lines.push(SellableLine {
                item_id: item.id.clone(),
                product_id: Some(product.id.clone()),
                name: product.name.clone(),
                description: product.description.clone(),
                unit_price,
                quantity: item.quantity,
                image_url: product.image_url.clone(),
                price_source,
            });
        }

        let free_shipping =
            all_catalog_free && (!has_custom || settings.configurator_free_shipping);
        debug!(lines = lines.len(), free_shipping, "cart aggregated");

        let cart = AggregatedCart {
            lines,
            free_shipping,
        };
        cart.total()?;
        Ok(cart)
    }

    async fn custom_line(
        &self,
        item: &CartItem,
        settings: &SettingsSnapshot,
        locale: &str,
    ) -> ShopResult<SellableLine> {
        let configuration = item
            .configuration
            .as_ref()
            .ok_or_else(|| unavailable(item, UnavailableReason::MissingConfiguration))?;
        let quote = quote_configuration(self.store, configuration, settings, locale).await;

        let (unit_price, price_source, description) = match (self.policy, quote) {
            (CustomPricePolicy::PreferRecorded, quote) if item.unit_price > 0 => {
                let description = match quote {
                    Ok(q) => q.summary,
                    Err(err) => {
                        warn!(
                            item_id = %item.id,
                            recorded = item.unit_price,
                            error = %err,
                            "charging recorded price for a configuration that does not resolve"
                        );
                        String::new()
                    }
                };
                (item.unit_price, PriceSource::Recorded, description)
            }
            (_, Ok(quote)) => (quote.total(), PriceSource::Recomputed, quote.summary),
            (_, Err(err)) if err.is_retryable() => return Err(err),
            (_, Err(err)) => {
                debug!(item_id = %item.id, error = %err, "custom item cannot be priced");
                return Err(unavailable(item, UnavailableReason::Unpriceable));
            }
        };

        Ok(SellableLine {
            item_id: item.id.clone(),
            product_id: None,
            name: item.display_name().to_string(),
            description,
            unit_price,
            quantity: item.quantity,
            image_url: None,
            price_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Product;
    use crate::resolver::tests::{watch_configuration, watch_tree};
    use crate::store::MemoryStore;

    fn shop() -> MemoryStore {
        MemoryStore::new()
            .with_tree(watch_tree())
            .with_product(Product::new("lamp", "Desk lamp", 4500, 10).with_free_shipping(true))
            .with_product(Product::new("vase", "Vase", 2000, 0))
            .with_product(Product::new("chair", "Chair", 9000, 2).with_active(false))
            .with_product(Product::new("rug", "Rug", 7000, 3).with_free_shipping(true))
    }

    async fn aggregate(
        store: &MemoryStore,
        policy: CustomPricePolicy,
        items: Vec<CartItem>,
        settings: &SettingsSnapshot,
    ) -> ShopResult<AggregatedCart> {
        CartAggregator::new(store, policy)
            .aggregate(&CartSource::Guest(items), settings, "en")
            .await
    }

    #[tokio::test]
    async fn test_out_of_stock_item_fails_whole_cart() {
        let store = shop();
        let err = aggregate(
            &store,
            CustomPricePolicy::Recompute,
            vec![
                CartItem::product("lamp", 1).with_title("Desk lamp"),
                CartItem::product("vase", 1).with_title("Vase"),
            ],
            &SettingsSnapshot::default(),
        )
        .await
        .unwrap_err();

        match err {
            ShopError::CartUnavailable { item, reason, .. } => {
                assert_eq!(item, "Vase");
                assert_eq!(
                    reason,
                    UnavailableReason::InsufficientStock { requested: 1, available: 0 }
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_products() {
        let store = shop();
        let settings = SettingsSnapshot::default();

        let policy = CustomPricePolicy::Recompute;

        let err = aggregate(&store, policy, vec![CartItem::product("ghost", 1)], &settings)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShopError::CartUnavailable { reason: UnavailableReason::NotFound, .. }
        ));

        let err = aggregate(&store, policy, vec![CartItem::product("chair", 1)], &settings)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShopError::CartUnavailable { reason: UnavailableReason::Inactive, .. }
        ));
    }

    #[tokio::test]
    async fn test_quantities_are_summed_per_product() {
        let store = shop();
        let err = aggregate(
            &store,
            CustomPricePolicy::Recompute,
            vec![CartItem::product("rug", 2), CartItem::product("rug", 2)],
            &SettingsSnapshot::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ShopError::CartUnavailable {
                reason: UnavailableReason::InsufficientStock { requested: 4, available: 3 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_mixed_cart_prices_and_free_shipping() {
        let store = shop();
        let items = vec![
            CartItem::product("lamp", 2),
            CartItem::custom(watch_configuration(), 1).with_title("My watch"),
        ];

        let settings = SettingsSnapshot::default().with_global_discount(5.0);
        let cart = aggregate(&store, CustomPricePolicy::Recompute, items.clone(), &settings)
            .await
            .unwrap();
        assert_eq!(cart.lines[0].unit_price, 4500);
        assert_eq!(cart.lines[0].price_source, PriceSource::Catalog);
        assert_eq!(cart.lines[1].unit_price, 66500);
        assert_eq!(cart.lines[1].price_source, PriceSource::Recomputed);
        assert_eq!(cart.total().unwrap(), 9000 + 66500);
        assert!(!cart.free_shipping);
        assert_eq!(cart.stock_quantities(), vec![("lamp".to_string(), 2)]);

        let settings = settings.with_configurator_free_shipping(true);
        let cart = aggregate(&store, CustomPricePolicy::Recompute, items, &settings)
            .await
            .unwrap();
        assert!(cart.free_shipping);
    }

    #[tokio::test]
    async fn test_catalog_rows_keep_recorded_price() {
        let store = shop();
        for policy in [CustomPricePolicy::Recompute, CustomPricePolicy::PreferRecorded] {
            let cart = aggregate(
                &store,
                policy,
                vec![
                    CartItem::product("lamp", 1).with_recorded_price(4200),
                    CartItem::product("rug", 1).with_recorded_price(0),
                ],
                &SettingsSnapshot::default(),
            )
            .await
            .unwrap();
            assert_eq!(cart.lines[0].unit_price, 4200);
            assert_eq!(cart.lines[0].price_source, PriceSource::Recorded);
            assert_eq!(cart.lines[1].price_source, PriceSource::Catalog);
        }
    }

    #[tokio::test]
    async fn test_oversized_recorded_price_is_rejected() {
        let store = shop();
        let err = aggregate(
            &store,
            CustomPricePolicy::PreferRecorded,
            vec![CartItem::product("lamp", 2).with_recorded_price(i64::MAX / 2 + 1)],
            &SettingsSnapshot::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ShopError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_non_free_catalog_item_disables_free_shipping() {
        let store = shop().with_product(Product::new("mug", "Mug", 900, 5));
        let cart = aggregate(
            &store,
            CustomPricePolicy::Recompute,
            vec![CartItem::product("lamp", 1), CartItem::product("mug", 1)],
            &SettingsSnapshot::default().with_configurator_free_shipping(true),
        )
        .await
        .unwrap();
        assert!(!cart.free_shipping);
    }

    #[tokio::test]
    async fn test_unresolvable_custom_item_under_recompute() {
        let store = shop();
        let item = CartItem::custom(Configuration::new("toaster"), 1)
            .with_recorded_price(30000)
            .with_title("Mystery build");

        let settings = SettingsSnapshot::default();
        let err = aggregate(&store, CustomPricePolicy::Recompute, vec![item], &settings)
            .await
            .unwrap_err();
        match err {
            ShopError::CartUnavailable { item, reason, .. } => {
                assert_eq!(item, "Mystery build");
                assert_eq!(reason, UnavailableReason::Unpriceable);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prefer_recorded_falls_back_to_client_price() {
        let store = shop();
        let item = CartItem::custom(Configuration::new("toaster"), 1).with_recorded_price(30000);

        let settings = SettingsSnapshot::default();
        let cart = aggregate(&store, CustomPricePolicy::PreferRecorded, vec![item], &settings)
            .await
            .unwrap();
        assert_eq!(cart.lines[0].unit_price, 30000);
        assert_eq!(cart.lines[0].price_source, PriceSource::Recorded);
    }

    #[tokio::test]
    async fn test_prefer_recorded_recomputes_non_positive_price() {
        let store = shop();
        let item = CartItem::custom(watch_configuration(), 1).with_recorded_price(0);

        let settings = SettingsSnapshot::default();
        let cart = aggregate(&store, CustomPricePolicy::PreferRecorded, vec![item], &settings)
            .await
            .unwrap();
        assert_eq!(cart.lines[0].unit_price, 70000);
        assert_eq!(cart.lines[0].price_source, PriceSource::Recomputed);
    }

    #[tokio::test]
    async fn test_user_cart_is_read_from_store() {
        let store = shop().with_cart("u1", vec![CartItem::product("lamp", 1)]);
        let cart = CartAggregator::new(&store, CustomPricePolicy::Recompute)
            .aggregate(&CartSource::User("u1".into()), &SettingsSnapshot::default(), "en")
            .await
            .unwrap();
        assert_eq!(cart.lines.len(), 1);

        let err = CartAggregator::new(&store, CustomPricePolicy::Recompute)
            .aggregate(&CartSource::User("u2".into()), &SettingsSnapshot::default(), "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::InvalidRequest(_)));
    }

    #[test]
    fn test_custom_items_use_reserved_prefix() {
        let item = CartItem::custom(watch_configuration(), 1);
        assert!(item.is_custom());
        assert!(!CartItem::product("lamp", 1).is_custom());
        assert_eq!(CartItem::product("lamp", 1).product_ref(), "lamp");
    }
}
