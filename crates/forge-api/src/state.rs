//! # Application State
//!
//! Configuration and shared services for the Axum application.

use crate::fx::HttpRateSource;
use crate::notify::WebhookNotifier;
use anyhow::Context;
use forge_core::fx::DEFAULT_RATE_TTL;
use forge_core::{
    BoxedPaymentStrategy, CatalogSeed, CheckoutOptions, CheckoutService, CheckoutUrls, Currency,
    CustomPricePolicy, ExchangeRates, FulfillmentHandler, LogNotifier, MemoryStore, SharedNotifier,
    SharedStore,
};
use forge_postgres::PostgresStore;
use forge_stripe::StripeCheckoutStrategy;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for checkout redirects
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Currency catalog prices are stored in
    pub base_currency: Currency,
    pub price_policy: CustomPricePolicy,
    pub fx_api_url: Option<String>,
    pub fx_refresh: Duration,
    pub notify_webhook_url: Option<String>,
    /// Receives a copy of every order confirmation
    pub shop_email: Option<String>,
    /// Postgres store when set, in-memory catalog otherwise
    pub database_url: Option<String>,
    pub log_format: LogFormat,
    /// ISO codes offered for shipping address collection
    pub shipping_countries: Vec<String>,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through an arbitrary key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.parse().with_context(|| format!("invalid PORT: {}", raw))?,
            None => 8080,
        };
        let base_currency = match get("BASE_CURRENCY") {
            Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
            None => Currency::EUR,
        };
        let price_policy = match get("CUSTOM_PRICE_POLICY") {
            Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
            None => CustomPricePolicy::default(),
        };
        let fx_refresh = match get("FX_REFRESH_SECS") {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .with_context(|| format!("invalid FX_REFRESH_SECS: {}", raw))?,
            ),
            None => DEFAULT_RATE_TTL,
        };
        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let shipping_countries = get("SHIPPING_COUNTRIES")
            .map(|raw| {
                raw.split(',')
                    .map(|c| c.trim().to_ascii_uppercase())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            base_url: get("BASE_URL").unwrap_or_else(|| format!("http://localhost:{}", port)),
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            base_currency,
            price_policy,
            fx_api_url: get("FX_API_URL"),
            fx_refresh,
            notify_webhook_url: get("NOTIFY_WEBHOOK_URL"),
            shop_email: get("SHOP_EMAIL"),
            database_url: get("DATABASE_URL"),
            log_format,
            shipping_countries,
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn checkout_options(&self) -> CheckoutOptions {
        CheckoutOptions {
            base_currency: self.base_currency,
            price_policy: self.price_policy,
            urls: CheckoutUrls::new(&self.base_url),
            shipping_countries: self.shipping_countries.clone(),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: SharedStore,
    pub strategy: BoxedPaymentStrategy,
    pub checkout: Arc<CheckoutService>,
    pub fulfillment: Arc<FulfillmentHandler>,
}

impl AppState {
    /// Wire the pipeline services around a store, strategy, notifier and rate cache
    pub fn new(
        config: AppConfig,
        store: SharedStore,
        strategy: BoxedPaymentStrategy,
        notifier: SharedNotifier,
        rates: Arc<ExchangeRates>,
    ) -> Self {
        let checkout = CheckoutService::new(
            store.clone(),
            strategy.clone(),
            rates,
            config.checkout_options(),
        );
        let fulfillment = FulfillmentHandler::new(store.clone(), notifier, config.base_currency)
            .with_shop_email(config.shop_email.clone());

        Self {
            config: Arc::new(config),
            store,
            strategy,
            checkout: Arc::new(checkout),
            fulfillment: Arc::new(fulfillment),
        }
    }

    /// Build everything from the environment
    pub async fn from_env() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let strategy = StripeCheckoutStrategy::from_env()
            .map_err(|e| anyhow::anyhow!("failed to initialize Stripe: {}", e))?;
        let store = build_store(&config).await?;

        let rates = match &config.fx_api_url {
            Some(url) => {
                info!(
                    url = %url,
                    refresh_secs = config.fx_refresh.as_secs(),
                    "live exchange rates enabled"
                );
                ExchangeRates::new(
                    config.base_currency,
                    Arc::new(HttpRateSource::new(url)?),
                    config.fx_refresh,
                )
            }
            None => ExchangeRates::offline(config.base_currency),
        };

        let notifier: SharedNotifier = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url)?),
            None => {
                warn!("NOTIFY_WEBHOOK_URL not set, emails are only logged");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self::new(
            config,
            store,
            Arc::new(strategy),
            notifier,
            Arc::new(rates),
        ))
    }
}

async fn build_store(config: &AppConfig) -> anyhow::Result<SharedStore> {
    if let Some(url) = &config.database_url {
        let store = PostgresStore::connect(url)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to Postgres: {}", e))?;
        store
            .migrate()
            .await
            .map_err(|e| anyhow::anyhow!("failed to apply schema: {}", e))?;
        return Ok(Arc::new(store));
    }

    let seed = load_catalog_seed()?;
    Ok(Arc::new(MemoryStore::from_seed(seed)))
}

/// Load development catalog data from config/catalog.toml
fn load_catalog_seed() -> anyhow::Result<CatalogSeed> {
    let config_paths = [
        "config/catalog.toml",
        "../config/catalog.toml",
        "../../config/catalog.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let seed = CatalogSeed::from_toml_str(&content)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", path, e))?;
            info!(
                path,
                products = seed.products.len(),
                function_options = seed.function_options.len(),
                "loaded catalog seed"
            );
            return Ok(seed);
        }
    }

    warn!("no catalog seed found, starting with an empty catalog");
    Ok(CatalogSeed::default())
}
