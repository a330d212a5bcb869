//! # Store Traits
//!
//! The relational surface the pipeline consumes. Catalog data is read-only
//! here; writes are limited to configuration records, orders, cart clearing
//! and stock decrements.
//!
//! Two invariants are pushed down to the backend:
//!
//! - [`OrderStore::insert_order`] is keyed by a unique session id. A second
//!   insert for the same session reports [`InsertOutcome::Duplicate`].
//! - [`InventoryStore::decrement_stock`] is a single atomic
//!   decrement-with-floor, recorded per `(session_id, product_id)` so a
//!   replayed movement is never applied twice.

pub mod memory;

use crate::cart::CartItem;
use crate::catalog::{FunctionTree, Product};
use crate::configuration::ConfigurationRecord;
use crate::error::ShopResult;
use crate::order::Order;
use crate::settings::SettingsSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use memory::{CatalogSeed, MemoryStore};

/// Read access to products, the configurator tree and site settings
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Tree for one function option, `None` if the id is unknown
    async fn function_tree(&self, function_option_id: &str) -> ShopResult<Option<FunctionTree>>;

    async fn product(&self, product_id: &str) -> ShopResult<Option<Product>>;

    /// Current settings, read in one go
    async fn settings(&self) -> ShopResult<SettingsSnapshot>;
}

/// Persisted carts of authenticated users
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn cart_items(&self, user_id: &str) -> ShopResult<Vec<CartItem>>;

    /// Remove every row of the user's cart; returns the number removed
    async fn clear_cart(&self, user_id: &str) -> ShopResult<u64>;
}

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn insert_configuration(&self, record: &ConfigurationRecord) -> ShopResult<()>;

    /// Flip a record to `paid`. Returns false if no such record exists.
    async fn mark_configuration_paid(&self, configuration_id: &str) -> ShopResult<bool>;

    async fn configuration(
        &self,
        configuration_id: &str,
    ) -> ShopResult<Option<ConfigurationRecord>>;
}

/// One stock decrement caused by one payment session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub session_id: String,
    pub product_id: String,
    pub quantity: u32,
}

impl StockMovement {
    pub fn new(
        session_id: impl Into<String>,
        product_id: impl Into<String>,
        quantity: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Result of a stock decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockChange {
    /// Stock reduced (floored at zero)
    Applied { remaining: u32 },
    /// Stock was already zero; nothing changed
    Depleted,
    /// This movement was applied by an earlier delivery
    AlreadyApplied,
    NotFound,
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn decrement_stock(&self, movement: &StockMovement) -> ShopResult<StockChange>;
}

/// Result of inserting an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    /// An order for this session already exists
    Duplicate,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn order_by_session(&self, session_id: &str) -> ShopResult<Option<Order>>;

    async fn insert_order(&self, order: &Order) -> ShopResult<InsertOutcome>;
}

/// Everything the pipeline needs from storage
pub trait ShopStore:
    CatalogStore + CartStore + ConfigurationStore + InventoryStore + OrderStore
{
}

impl<T> ShopStore for T where
    T: CatalogStore + CartStore + ConfigurationStore + InventoryStore + OrderStore
{
}

/// Type alias for a shared store (dynamic dispatch)
pub type SharedStore = Arc<dyn ShopStore>;
