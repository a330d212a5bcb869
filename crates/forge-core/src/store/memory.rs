//! In-memory store for development and tests.
//!
//! Seeded from a [`CatalogSeed`] (usually `config/catalog.toml`). Enforces
//! the same session-id uniqueness and movement-ledger rules as the Postgres
//! store so pipeline tests exercise the real idempotency paths.

use super::{
    CartStore, CatalogStore, ConfigurationStore, InsertOutcome, InventoryStore, OrderStore,
    StockChange, StockMovement,
};
use crate::cart::CartItem;
use crate::catalog::{Addon, FunctionOption, FunctionStep, FunctionTree, Product, Step, StepOption};
use crate::configuration::{ConfigurationRecord, ConfigurationStatus};
use crate::error::{ShopError, ShopResult};
use crate::order::Order;
use crate::settings::{SettingRow, SettingsSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Catalog tables as they appear in `catalog.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub function_options: Vec<FunctionOption>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub function_steps: Vec<FunctionStep>,
    #[serde(default)]
    pub options: Vec<StepOption>,
    #[serde(default)]
    pub addons: Vec<Addon>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub settings: Vec<SettingRow>,
}

impl CatalogSeed {
    pub fn from_toml_str(raw: &str) -> ShopResult<Self> {
        toml::from_str(raw)
            .map_err(|e| ShopError::Configuration(format!("invalid catalog seed: {}", e)))
    }
}

#[derive(Default)]
struct Tables {
    catalog: CatalogSeed,
    settings_version: u64,
    carts: HashMap<String, Vec<CartItem>>,
    configurations: HashMap<String, ConfigurationRecord>,
    orders: HashMap<String, Order>,
    movements: HashSet<(String, String)>,
    failing_order_inserts: u32,
}

/// Store backed by process memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> Self {
        let store = Self::new();
        store.write().catalog = seed;
        store
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builder: add a product (replaces one with the same id)
    pub fn with_product(self, product: Product) -> Self {
        {
            let mut tables = self.write();
            tables.catalog.products.retain(|p| p.id != product.id);
            tables.catalog.products.push(product);
        }
        self
    }

    /// Builder: add an assembled tree, mapping its steps in order
    pub fn with_tree(self, tree: FunctionTree) -> Self {
        {
            let mut tables = self.write();
            let catalog = &mut tables.catalog;
            let function_id = tree.function.id.clone();
            catalog.function_options.retain(|f| f.id != function_id);
            catalog.function_options.push(tree.function);
            for (position, step) in tree.steps.into_iter().enumerate() {
                catalog.function_steps.push(FunctionStep {
                    function_option_id: function_id.clone(),
                    step_id: step.id.clone(),
                    position: position as i32,
                });
                if !catalog.steps.iter().any(|s| s.id == step.id) {
                    catalog.steps.push(step);
                }
            }
            catalog.options.extend(tree.options);
            catalog.addons.extend(tree.addons);
        }
        self
    }

    /// Builder: set a settings row
    pub fn with_setting(self, key: &str, value: &str) -> Self {
        self.set_setting(key, value);
        self
    }

    /// Builder: persisted cart for a user
    pub fn with_cart(self, user_id: &str, items: Vec<CartItem>) -> Self {
        self.write().carts.insert(user_id.to_string(), items);
        self
    }

    /// Update a settings row and bump the settings version
    pub fn set_setting(&self, key: &str, value: &str) {
        let mut tables = self.write();
        tables.catalog.settings.retain(|row| row.key != key);
        tables.catalog.settings.push(SettingRow::new(key, value));
        tables.settings_version += 1;
    }

    /// Make the next `count` order inserts fail with a persistence error
    pub fn fail_next_order_inserts(&self, count: u32) {
        self.write().failing_order_inserts = count;
    }

    pub fn stock(&self, product_id: &str) -> Option<u32> {
        self.read()
            .catalog
            .products
            .iter()
            .find(|p| p.id == product_id)
            .map(|p| p.stock)
    }

    pub fn orders(&self) -> Vec<Order> {
        self.read().orders.values().cloned().collect()
    }

    pub fn configurations(&self) -> Vec<ConfigurationRecord> {
        self.read().configurations.values().cloned().collect()
    }

    pub fn movement_count(&self) -> usize {
        self.read().movements.len()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn function_tree(&self, function_option_id: &str) -> ShopResult<Option<FunctionTree>> {
        let tables = self.read();
        let catalog = &tables.catalog;
        Ok(catalog
            .function_options
            .iter()
            .find(|f| f.id == function_option_id)
            .map(|function| {
                FunctionTree::assemble(
                    function.clone(),
                    &catalog.steps,
                    &catalog.function_steps,
                    &catalog.options,
                    &catalog.addons,
                )
            }))
    }

    async fn product(&self, product_id: &str) -> ShopResult<Option<Product>> {
        Ok(self
            .read()
            .catalog
            .products
            .iter()
            .find(|p| p.id == product_id)
            .cloned())
    }

    async fn settings(&self) -> ShopResult<SettingsSnapshot> {
        let tables = self.read();
        Ok(SettingsSnapshot::from_rows(
            tables.settings_version,
            &tables.catalog.settings,
        ))
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn cart_items(&self, user_id: &str) -> ShopResult<Vec<CartItem>> {
        Ok(self.read().carts.get(user_id).cloned().unwrap_or_default())
    }

    async fn clear_cart(&self, user_id: &str) -> ShopResult<u64> {
        Ok(self
            .write()
            .carts
            .remove(user_id)
            .map_or(0, |items| items.len() as u64))
    }
}

#[async_trait]
impl ConfigurationStore for MemoryStore {
    async fn insert_configuration(&self, record: &ConfigurationRecord) -> ShopResult<()> {
        let mut tables = self.write();
        if tables.configurations.contains_key(&record.id) {
            return Err(ShopError::Persistence(format!(
                "configuration {} already exists",
                record.id
            )));
        }
        tables.configurations.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn mark_configuration_paid(&self, configuration_id: &str) -> ShopResult<bool> {
        Ok(match self.write().configurations.get_mut(configuration_id) {
            Some(record) => {
                record.status = ConfigurationStatus::Paid;
                record.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn configuration(
        &self,
        configuration_id: &str,
    ) -> ShopResult<Option<ConfigurationRecord>> {
        Ok(self.read().configurations.get(configuration_id).cloned())
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn decrement_stock(&self, movement: &StockMovement) -> ShopResult<StockChange> {
        let mut tables = self.write();
        let key = (movement.session_id.clone(), movement.product_id.clone());
        if tables.movements.contains(&key) {
            return Ok(StockChange::AlreadyApplied);
        }

        let Some(product) = tables
            .catalog
            .products
            .iter_mut()
            .find(|p| p.id == movement.product_id)
        else {
            return Ok(StockChange::NotFound);
        };
        let change = if product.stock == 0 {
            StockChange::Depleted
        } else {
            product.stock = product.stock.saturating_sub(movement.quantity);
            StockChange::Applied {
                remaining: product.stock,
            }
        };
        tables.movements.insert(key);
        Ok(change)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn order_by_session(&self, session_id: &str) -> ShopResult<Option<Order>> {
        Ok(self.read().orders.get(session_id).cloned())
    }

    async fn insert_order(&self, order: &Order) -> ShopResult<InsertOutcome> {
        let mut tables = self.write();
        if tables.failing_order_inserts > 0 {
            tables.failing_order_inserts -= 1;
            return Err(ShopError::Persistence("order insert failed".to_string()));
        }
        if tables.orders.contains_key(&order.session_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        tables.orders.insert(order.session_id.clone(), order.clone());
        Ok(InsertOutcome::Inserted)
    }
}
