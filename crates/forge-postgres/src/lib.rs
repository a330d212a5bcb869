//! # forge-postgres
//!
//! Postgres implementation of the forgecart store traits.
//!
//! The schema in `schema.sql` carries the two storage-level guarantees the
//! fulfillment path relies on:
//!
//! - `orders.session_id` is `UNIQUE`; an insert that hits it is reported as
//!   [`InsertOutcome::Duplicate`].
//! - `stock_movements` is keyed by `(session_id, product_id)`. A decrement
//!   inserts its movement and updates stock in one transaction, so a
//!   replayed delivery never decrements twice.
//!
//! ```rust,ignore
//! let store = PostgresStore::connect(&database_url).await?;
//! store.migrate().await?;
//! let store: SharedStore = Arc::new(store);
//! ```

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use forge_core::{
    CartItem, CartStore, CatalogSeed, CatalogStore, ConfigurationRecord, ConfigurationStore,
    FunctionTree, InsertOutcome, InventoryStore, Order, OrderStore, Product, SettingRow,
    SettingsSnapshot, ShopResult, StockChange, StockMovement,
};
use rows::persistence;
use tokio_postgres::types::Json;
use tokio_postgres::NoTls;
use tracing::{debug, info, instrument, warn};

/// Schema applied by [`PostgresStore::migrate`]
pub const SCHEMA: &str = include_str!("schema.sql");

/// Store backed by a deadpool connection pool
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from a `postgres://` URL
    pub async fn connect(database_url: &str) -> ShopResult<Self> {
        let mut config = Config::new();
        config.url = Some(database_url.to_string());
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| persistence("create pool", e))?;

        let store = Self::new(pool);
        // Fail at startup rather than on the first request
        store.client().await?;
        info!("connected to Postgres");
        Ok(store)
    }

    async fn client(&self) -> ShopResult<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| persistence("acquire connection", e))
    }

    /// Create missing tables
    pub async fn migrate(&self) -> ShopResult<()> {
        self.client()
            .await?
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| persistence("apply schema", e))?;
        info!("schema up to date");
        Ok(())
    }

    /// Load catalog rows, keeping rows that already exist
    pub async fn seed(&self, seed: &CatalogSeed) -> ShopResult<()> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| persistence("begin seed", e))?;

        for f in &seed.function_options {
            tx.execute(
                "INSERT INTO function_options (id, labels, price, discount_percent)
                 VALUES ($1, $2, $3, $4) ON CONFLICT (id) DO NOTHING",
                &[&f.id, &Json(&f.labels), &f.price, &f.discount_percent],
            )
            .await
            .map_err(|e| persistence("seed function option", e))?;
        }
        for s in &seed.steps {
            tx.execute(
                "INSERT INTO steps (id, step_key, labels, optional, sort_order)
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO NOTHING",
                &[&s.id, &s.step_key, &Json(&s.labels), &s.optional, &s.sort_order],
            )
            .await
            .map_err(|e| persistence("seed step", e))?;
        }
        for m in &seed.function_steps {
            tx.execute(
                "INSERT INTO function_steps (function_option_id, step_id, position)
                 VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                &[&m.function_option_id, &m.step_id, &m.position],
            )
            .await
            .map_err(|e| persistence("seed function step", e))?;
        }
        for o in &seed.options {
            tx.execute(
                "INSERT INTO options (id, step_id, function_option_id, labels, price, discount_percent, sort_order)
                 VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
                &[
                    &o.id,
                    &o.step_id,
                    &o.function_option_id,
                    &Json(&o.labels),
                    &o.price,
                    &o.discount_percent,
                    &o.sort_order,
                ],
            )
            .await
            .map_err(|e| persistence("seed option", e))?;
        }
        for a in &seed.addons {
            tx.execute(
                "INSERT INTO addons (id, step_id, labels, price, gate_step_id, allowed_option_ids, sort_order)
                 VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
                &[
                    &a.id,
                    &a.step_id,
                    &Json(&a.labels),
                    &a.price,
                    &a.gate_step_id,
                    &a.allowed_option_ids,
                    &a.sort_order,
                ],
            )
            .await
            .map_err(|e| persistence("seed addon", e))?;
        }
        for p in &seed.products {
            seed_product(&tx, p).await?;
        }
        for row in &seed.settings {
            tx.execute(
                "INSERT INTO site_settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
                &[&row.key, &row.value],
            )
            .await
            .map_err(|e| persistence("seed setting", e))?;
        }

        tx.commit().await.map_err(|e| persistence("commit seed", e))?;
        info!(
            products = seed.products.len(),
            function_options = seed.function_options.len(),
            "catalog seeded"
        );
        Ok(())
    }

    /// Insert or replace a persisted cart row
    pub async fn put_cart_item(
        &self,
        user_id: &str,
        position: i32,
        item: &CartItem,
    ) -> ShopResult<()> {
        let quantity = i32::try_from(item.quantity).unwrap_or(i32::MAX);
        self.client()
            .await?
            .execute(
                "INSERT INTO cart_items (user_id, id, position, quantity, unit_price, title, product_id, configuration)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (user_id, id) DO UPDATE
                 SET position = EXCLUDED.position, quantity = EXCLUDED.quantity,
                     unit_price = EXCLUDED.unit_price, title = EXCLUDED.title,
                     product_id = EXCLUDED.product_id, configuration = EXCLUDED.configuration",
                &[
                    &user_id,
                    &item.id,
                    &position,
                    &quantity,
                    &item.unit_price,
                    &item.title,
                    &item.product_id,
                    &item.configuration.as_ref().map(Json),
                ],
            )
            .await
            .map_err(|e| persistence("put cart item", e))?;
        Ok(())
    }
}

async fn seed_product(tx: &deadpool_postgres::Transaction<'_>, p: &Product) -> ShopResult<()> {
    let stock = i32::try_from(p.stock).unwrap_or(i32::MAX);
    tx.execute(
        "INSERT INTO products (id, name, description, price, stock, active, free_shipping, image_url)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (id) DO NOTHING",
        &[
            &p.id,
            &p.name,
            &p.description,
            &p.price,
            &stock,
            &p.active,
            &p.free_shipping,
            &p.image_url,
        ],
    )
    .await
    .map_err(|e| persistence("seed product", e))?;
    Ok(())
}

#[async_trait]
impl CatalogStore for PostgresStore {
    #[instrument(skip(self))]
    async fn function_tree(&self, function_option_id: &str) -> ShopResult<Option<FunctionTree>> {
        let client = self.client().await?;

        let Some(row) = client
            .query_opt(
                "SELECT id, labels, price, discount_percent FROM function_options WHERE id = $1",
                &[&function_option_id],
            )
            .await
            .map_err(|e| persistence("load function option", e))?
        else {
            return Ok(None);
        };
        let function = rows::function_option(&row)?;

        let mappings = client
            .query(
                "SELECT function_option_id, step_id, position FROM function_steps
                 WHERE function_option_id = $1",
                &[&function_option_id],
            )
            .await
            .map_err(|e| persistence("load function steps", e))?
            .iter()
            .map(rows::function_step)
            .collect::<ShopResult<Vec<_>>>()?;

        let steps = client
            .query(
                "SELECT s.id, s.step_key, s.labels, s.optional, s.sort_order
                 FROM steps s JOIN function_steps fs ON fs.step_id = s.id
                 WHERE fs.function_option_id = $1",
                &[&function_option_id],
            )
            .await
            .map_err(|e| persistence("load steps", e))?
            .iter()
            .map(rows::step)
            .collect::<ShopResult<Vec<_>>>()?;

        let options = client
            .query(
                "SELECT o.id, o.step_id, o.function_option_id, o.labels, o.price, o.discount_percent, o.sort_order
                 FROM options o JOIN function_steps fs ON fs.step_id = o.step_id
                 WHERE fs.function_option_id = $1
                   AND (o.function_option_id IS NULL OR o.function_option_id = $1)",
                &[&function_option_id],
            )
            .await
            .map_err(|e| persistence("load options", e))?
            .iter()
            .map(rows::step_option)
            .collect::<ShopResult<Vec<_>>>()?;

        let addons = client
            .query(
                "SELECT a.id, a.step_id, a.labels, a.price, a.gate_step_id, a.allowed_option_ids, a.sort_order
                 FROM addons a JOIN function_steps fs ON fs.step_id = a.step_id
                 WHERE fs.function_option_id = $1",
                &[&function_option_id],
            )
            .await
            .map_err(|e| persistence("load addons", e))?
            .iter()
            .map(rows::addon)
            .collect::<ShopResult<Vec<_>>>()?;

        debug!(
            steps = steps.len(),
            options = options.len(),
            addons = addons.len(),
            "loaded function tree"
        );
        Ok(Some(FunctionTree::assemble(
            function, &steps, &mappings, &options, &addons,
        )))
    }

    async fn product(&self, product_id: &str) -> ShopResult<Option<Product>> {
        self.client()
            .await?
            .query_opt(
                "SELECT id, name, description, price, stock, active, free_shipping, image_url
                 FROM products WHERE id = $1",
                &[&product_id],
            )
            .await
            .map_err(|e| persistence("load product", e))?
            .map(|row| rows::product(&row))
            .transpose()
    }

    async fn settings(&self) -> ShopResult<SettingsSnapshot> {
        let raw = self
            .client()
            .await?
            .query("SELECT key, value, updated_at FROM site_settings", &[])
            .await
            .map_err(|e| persistence("load settings", e))?;

        let mut latest: Option<DateTime<Utc>> = None;
        let mut settings = Vec::with_capacity(raw.len());
        for row in &raw {
            let key: String = row.try_get("key").map_err(|e| persistence("column key", e))?;
            let value: String = row.try_get("value").map_err(|e| persistence("column value", e))?;
            let updated: DateTime<Utc> = row
                .try_get("updated_at")
                .map_err(|e| persistence("column updated_at", e))?;
            latest = latest.max(Some(updated));
            settings.push(SettingRow::new(key, value));
        }

        Ok(SettingsSnapshot::from_rows(
            rows::settings_version(latest),
            &settings,
        ))
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn cart_items(&self, user_id: &str) -> ShopResult<Vec<CartItem>> {
        self.client()
            .await?
            .query(
                "SELECT id, quantity, unit_price, title, product_id, configuration
                 FROM cart_items WHERE user_id = $1 ORDER BY position, id",
                &[&user_id],
            )
            .await
            .map_err(|e| persistence("load cart", e))?
            .iter()
            .map(rows::cart_item)
            .collect()
    }

    async fn clear_cart(&self, user_id: &str) -> ShopResult<u64> {
        self.client()
            .await?
            .execute("DELETE FROM cart_items WHERE user_id = $1", &[&user_id])
            .await
            .map_err(|e| persistence("clear cart", e))
    }
}

#[async_trait]
impl ConfigurationStore for PostgresStore {
    async fn insert_configuration(&self, record: &ConfigurationRecord) -> ShopResult<()> {
        self.client()
            .await?
            .execute(
                "INSERT INTO configurations
                 (id, status, configuration, product_id, user_id, total, summary, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &record.id,
                    &record.status.as_str(),
                    &record.configuration.as_ref().map(Json),
                    &record.product_id,
                    &record.user_id,
                    &record.total,
                    &record.summary,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| persistence("insert configuration", e))?;
        Ok(())
    }

    async fn mark_configuration_paid(&self, configuration_id: &str) -> ShopResult<bool> {
        let updated = self
            .client()
            .await?
            .execute(
                "UPDATE configurations SET status = 'paid', updated_at = now() WHERE id = $1",
                &[&configuration_id],
            )
            .await
            .map_err(|e| persistence("mark configuration paid", e))?;
        Ok(updated > 0)
    }

    async fn configuration(
        &self,
        configuration_id: &str,
    ) -> ShopResult<Option<ConfigurationRecord>> {
        self.client()
            .await?
            .query_opt(
                "SELECT id, status, configuration, product_id, user_id, total, summary, created_at, updated_at
                 FROM configurations WHERE id = $1",
                &[&configuration_id],
            )
            .await
            .map_err(|e| persistence("load configuration", e))?
            .map(|row| rows::configuration_record(&row))
            .transpose()
    }
}

#[async_trait]
impl InventoryStore for PostgresStore {
    #[instrument(
        skip(self),
        fields(session_id = %movement.session_id, product_id = %movement.product_id)
    )]
    async fn decrement_stock(&self, movement: &StockMovement) -> ShopResult<StockChange> {
        let quantity = i32::try_from(movement.quantity).unwrap_or(i32::MAX);
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| persistence("begin decrement", e))?;

        let recorded = tx
            .execute(
                "INSERT INTO stock_movements (session_id, product_id, quantity)
                 VALUES ($1, $2, $3) ON CONFLICT (session_id, product_id) DO NOTHING",
                &[&movement.session_id, &movement.product_id, &quantity],
            )
            .await
            .map_err(|e| persistence("record stock movement", e))?;
        if recorded == 0 {
            tx.commit().await.map_err(|e| persistence("commit decrement", e))?;
            return Ok(StockChange::AlreadyApplied);
        }

        let updated = tx
            .query_opt(
                "UPDATE products SET stock = GREATEST(stock - $2, 0)
                 WHERE id = $1 AND stock > 0 RETURNING stock",
                &[&movement.product_id, &quantity],
            )
            .await
            .map_err(|e| persistence("decrement stock", e))?;

        let change = match updated {
            Some(row) => {
                let remaining: i32 = row
                    .try_get("stock")
                    .map_err(|e| persistence("column stock", e))?;
                StockChange::Applied {
                    remaining: remaining.max(0) as u32,
                }
            }
            None => {
                let exists = tx
                    .query_opt("SELECT 1 FROM products WHERE id = $1", &[&movement.product_id])
                    .await
                    .map_err(|e| persistence("check product", e))?
                    .is_some();
                if !exists {
                    // Dropping the transaction rolls back the movement row
                    warn!("stock movement for unknown product");
                    return Ok(StockChange::NotFound);
                }
                StockChange::Depleted
            }
        };

        tx.commit().await.map_err(|e| persistence("commit decrement", e))?;
        debug!(?change, "stock movement applied");
        Ok(change)
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn order_by_session(&self, session_id: &str) -> ShopResult<Option<Order>> {
        self.client()
            .await?
            .query_opt(
                "SELECT id, session_id, status, total, currency, summary, shipping_address,
                        customer_email, user_id, configuration_id, flow, created_at, updated_at
                 FROM orders WHERE session_id = $1",
                &[&session_id],
            )
            .await
            .map_err(|e| persistence("load order", e))?
            .map(|row| rows::order(&row))
            .transpose()
    }

    #[instrument(skip(self, order), fields(session_id = %order.session_id))]
    async fn insert_order(&self, order: &Order) -> ShopResult<InsertOutcome> {
        let inserted = self
            .client()
            .await?
            .execute(
                "INSERT INTO orders
                 (id, session_id, status, total, currency, summary, shipping_address,
                  customer_email, user_id, configuration_id, flow, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (session_id) DO NOTHING",
                &[
                    &order.id,
                    &order.session_id,
                    &order.status.as_str(),
                    &order.total.amount,
                    &order.total.currency.as_str(),
                    &order.summary,
                    &order.shipping_address.as_ref().map(Json),
                    &order.customer_email,
                    &order.user_id,
                    &order.configuration_id,
                    &order.flow.as_str(),
                    &order.created_at,
                    &order.updated_at,
                ],
            )
            .await
            .map_err(|e| persistence("insert order", e))?;

        if inserted == 0 {
            debug!("order insert hit session uniqueness");
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }
}
