//! # Checkout Session Builder
//!
//! Validates the tagged checkout payload, prices it against the current
//! catalog, converts into the display currency, enforces the processor's
//! minimum and asks the payment strategy for a hosted session.
//!
//! Ordering inside one request is strict: validation and pricing finish
//! before anything is persisted, and the pending configuration row is
//! written before the session is requested.

use crate::cart::{CartAggregator, CartItem, CartSource, CustomPricePolicy};
use crate::configuration::{Configuration, ConfigurationRecord};
use crate::error::{ShopError, ShopResult, UnavailableReason};
use crate::fx::{ExchangeRates, RateQuote};
use crate::money::{Currency, Price};
use crate::order::{sum_amounts, FlowKind, LineItem};
use crate::quote::{quote_configuration, Quote};
use crate::settings::SettingsSnapshot;
use crate::store::SharedStore;
use crate::strategy::{BoxedPaymentStrategy, CheckoutUrls};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ===== Request Types =====

/// The three checkout shapes, discriminated by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutFlow {
    /// A configured build
    Custom { configuration: Configuration },
    /// One ready-made product
    Built { product_id: String },
    /// A persisted user cart or an inline guest cart
    Cart {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        items: Option<Vec<CartItem>>,
    },
}

impl CheckoutFlow {
    pub fn kind(&self) -> FlowKind {
        match self {
            CheckoutFlow::Custom { .. } => FlowKind::Custom,
            CheckoutFlow::Built { .. } => FlowKind::Built,
            CheckoutFlow::Cart { .. } => FlowKind::Cart,
        }
    }
}

fn default_locale() -> String {
    "en".to_string()
}

/// Checkout request as accepted from the storefront
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    #[serde(flatten)]
    pub flow: CheckoutFlow,
    /// Display currency; the base currency when absent
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

impl CheckoutRequest {
    pub fn new(flow: CheckoutFlow) -> Self {
        Self {
            flow,
            currency: None,
            locale: default_locale(),
            customer_email: None,
        }
    }

    /// Builder: set currency
    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Builder: set locale
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Builder: set customer email
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    /// Reject malformed payloads before any pricing or store access
    pub fn validate(&self) -> ShopResult<()> {
        let invalid = |msg: &str| Err(ShopError::InvalidRequest(msg.to_string()));

        if let Some(email) = &self.customer_email {
            if !email.contains('@') || email.trim() != email {
                return invalid("customer_email is not a valid address");
            }
        }

        match &self.flow {
            CheckoutFlow::Custom { configuration } => {
                if configuration.function_option_id.trim().is_empty() {
                    return invalid("configuration.function_option_id is required");
                }
            }
            CheckoutFlow::Built { product_id } => {
                if product_id.trim().is_empty() {
                    return invalid("product_id is required");
                }
            }
            CheckoutFlow::Cart { user_id, items } => match (user_id, items) {
                (Some(_), Some(_)) | (None, None) => {
                    return invalid("cart checkout needs exactly one of user_id or items")
                }
                (Some(user_id), None) if user_id.trim().is_empty() => {
                    return invalid("user_id must not be empty")
                }
                (None, Some(items)) if items.is_empty() => return invalid("cart is empty"),
                (None, Some(items)) if items.iter().any(|i| i.quantity == 0) => {
                    return invalid("cart quantities must be at least 1")
                }
                _ => {}
            },
        }
        Ok(())
    }
}

// ===== Session Metadata =====

/// Processor limit on a single metadata value
pub const METADATA_VALUE_LIMIT: usize = 500;

const KEY_CORRELATION: &str = "correlation_id";
const KEY_FLOW: &str = "flow";
const KEY_USER: &str = "user_id";
const KEY_PRODUCT: &str = "product_id";
const KEY_SUMMARY: &str = "summary";
const MANIFEST_PREFIX: &str = "manifest_";

/// Purchased quantity per catalog product, carried to the webhook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockManifest(pub Vec<(String, u32)>);

impl StockManifest {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode as `id:qty,id:qty` split into chunks of at most `limit` chars.
    /// Entries are never split across chunks. `%` and `,` in ids are
    /// percent-encoded.
    pub fn encode(&self, limit: usize) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        for (product_id, qty) in &self.0 {
            let entry = format!("{}:{}", escape_id(product_id), qty);
            if !current.is_empty() && current.len() + 1 + entry.len() > limit {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(',');
            }
            current.push_str(&entry);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    pub fn decode<'a>(chunks: impl IntoIterator<Item = &'a str>) -> ShopResult<Self> {
        let mut entries = Vec::new();
        for chunk in chunks {
            for entry in chunk.split(',').filter(|e| !e.is_empty()) {
                let (product_id, qty) = entry.rsplit_once(':').ok_or_else(|| {
                    ShopError::WebhookParseError(format!("malformed manifest entry: {}", entry))
                })?;
                let qty = qty.parse::<u32>().map_err(|_| {
                    ShopError::WebhookParseError(format!("malformed manifest quantity: {}", entry))
                })?;
                entries.push((unescape_id(product_id)?, qty));
            }
        }
        Ok(Self(entries))
    }
}

fn escape_id(id: &str) -> String {
    id.replace('%', "%25").replace(',', "%2C")
}

fn unescape_id(raw: &str) -> ShopResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let escaped = rest.get(idx..idx + 3);
        match escaped {
            Some("%25") => out.push('%'),
            Some("%2C") => out.push(','),
            _ => {
                return Err(ShopError::WebhookParseError(format!(
                    "malformed manifest product id: {}",
                    raw
                )))
            }
        }
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Everything the webhook needs to fulfil a session without re-reading the cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Configuration id (custom/built) or a fresh id for cart checkouts
    pub correlation_id: String,
    pub flow: FlowKind,
    pub user_id: Option<String>,
    /// Purchased product for the built flow
    pub product_id: Option<String>,
    pub summary: String,
    pub manifest: StockManifest,
}

fn truncate(value: &str, limit: usize) -> String {
    match value.char_indices().nth(limit) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

impl SessionMetadata {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(KEY_CORRELATION.to_string(), self.correlation_id.clone());
        map.insert(KEY_FLOW.to_string(), self.flow.as_str().to_string());
        if let Some(user_id) = &self.user_id {
            map.insert(KEY_USER.to_string(), user_id.clone());
        }
        if let Some(product_id) = &self.product_id {
            map.insert(KEY_PRODUCT.to_string(), product_id.clone());
        }
        if !self.summary.is_empty() {
            map.insert(
                KEY_SUMMARY.to_string(),
                truncate(&self.summary, METADATA_VALUE_LIMIT),
            );
        }
        for (idx, chunk) in self.manifest.encode(METADATA_VALUE_LIMIT).into_iter().enumerate() {
            map.insert(format!("{}{}", MANIFEST_PREFIX, idx), chunk);
        }
        map
    }

    pub fn from_map(map: &BTreeMap<String, String>) -> ShopResult<Self> {
        let required = |key: &str| {
            map.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| {
                    ShopError::WebhookParseError(format!("missing metadata key {}", key))
                })
        };
        let flow = required(KEY_FLOW)?
            .parse::<FlowKind>()
            .map_err(ShopError::WebhookParseError)?;

        let chunks = (0..)
            .map(|idx| map.get(&format!("{}{}", MANIFEST_PREFIX, idx)))
            .take_while(Option::is_some)
            .flatten()
            .map(String::as_str);

        Ok(Self {
            correlation_id: required(KEY_CORRELATION)?,
            flow,
            user_id: map.get(KEY_USER).filter(|v| !v.is_empty()).cloned(),
            product_id: map.get(KEY_PRODUCT).filter(|v| !v.is_empty()).cloned(),
            summary: map.get(KEY_SUMMARY).cloned().unwrap_or_default(),
            manifest: StockManifest::decode(chunks)?,
        })
    }
}

// ===== Session Request =====

/// Provider-neutral payment session request, amounts in `currency`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub correlation_id: String,
    pub lines: Vec<LineItem>,
    pub currency: Currency,
    /// Add a zero-cost shipping rate
    pub free_shipping: bool,
    /// ISO country codes for shipping address collection
    pub shipping_countries: Vec<String>,
    pub customer_email: Option<String>,
    pub locale: String,
    pub metadata: BTreeMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
    pub idempotency_key: String,
}

impl SessionRequest {
    pub fn total(&self) -> ShopResult<i64> {
        sum_amounts(self.lines.iter().map(LineItem::total))
    }
}

// ===== Service =====

#[derive(Debug, Clone)]
pub struct CheckoutOptions {
    pub base_currency: Currency,
    pub price_policy: CustomPricePolicy,
    pub urls: CheckoutUrls,
    pub shipping_countries: Vec<String>,
}

impl Default for CheckoutOptions {
    fn default() -> Self {
        Self {
            base_currency: Currency::default(),
            price_policy: CustomPricePolicy::default(),
            urls: CheckoutUrls::default(),
            shipping_countries: Vec::new(),
        }
    }
}

/// Successful checkout: where to send the customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
    pub correlation_id: String,
    pub flow: FlowKind,
    pub amount: Price,
    /// When the hosted session stops accepting payment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Quote converted into the display currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedQuote {
    #[serde(flatten)]
    pub quote: Quote,
    pub amount: Price,
    pub rate: RateQuote,
}

/// A flow priced in base currency, not yet persisted
struct PreparedCheckout {
    lines: Vec<LineItem>,
    free_shipping: bool,
    record: Option<ConfigurationRecord>,
    metadata: SessionMetadata,
}

pub struct CheckoutService {
    store: SharedStore,
    strategy: BoxedPaymentStrategy,
    rates: Arc<ExchangeRates>,
    options: CheckoutOptions,
}

impl CheckoutService {
    pub fn new(
        store: SharedStore,
        strategy: BoxedPaymentStrategy,
        rates: Arc<ExchangeRates>,
        options: CheckoutOptions,
    ) -> Self {
        Self {
            store,
            strategy,
            rates,
            options,
        }
    }

    pub fn options(&self) -> &CheckoutOptions {
        &self.options
    }

    /// Run a checkout request through to a hosted payment session.
    #[instrument(skip_all, fields(flow = %request.flow.kind(), currency = tracing::field::Empty))]
    pub async fn checkout(&self, request: &CheckoutRequest) -> ShopResult<CheckoutResponse> {
        request.validate()?;
        let currency = request.currency.unwrap_or(self.options.base_currency);
        tracing::Span::current().record("currency", currency.as_str());

        let settings = self.store.settings().await?;
        let prepared = self.prepare(request, &settings).await?;

        let rate = self.rates.rate(currency, &settings).await;
        let lines: Vec<LineItem> = prepared
            .lines
            .into_iter()
            .map(|line| LineItem {
                unit_amount: Price::from_minor(line.unit_amount, self.options.base_currency)
                    .convert(currency, rate.rate)
                    .amount,
                ..line
            })
            .collect();
        let amount = sum_amounts(lines.iter().map(LineItem::total))?;

        let minimum = currency.minimum_charge();
        if amount < minimum {
            return Err(ShopError::BelowMinimumOrderAmount {
                amount,
                minimum,
                currency: currency.to_string(),
            });
        }

        if let Some(record) = &prepared.record {
            self.store.insert_configuration(record).await?;
        }

        let metadata = prepared.metadata;
        let session_request = SessionRequest {
            correlation_id: metadata.correlation_id.clone(),
            lines,
            currency,
            free_shipping: prepared.free_shipping,
            shipping_countries: self.options.shipping_countries.clone(),
            customer_email: request.customer_email.clone(),
            locale: request.locale.clone(),
            metadata: metadata.to_map(),
            success_url: self.options.urls.success_url(),
            cancel_url: self.options.urls.cancel_url(),
            idempotency_key: Uuid::new_v4().to_string(),
        };
        let session = self.strategy.create_checkout(&session_request).await?;

        info!(
            session_id = %session.session_id,
            correlation_id = %metadata.correlation_id,
            amount,
            rate_origin = ?rate.origin,
            "checkout session created"
        );

        Ok(CheckoutResponse {
            session_id: session.session_id,
            checkout_url: session.checkout_url,
            correlation_id: metadata.correlation_id,
            flow: metadata.flow,
            amount: Price::from_minor(amount, currency),
            expires_at: session.expires_at,
        })
    }

    /// Authoritative price for a configuration, nothing persisted
    pub async fn quote(
        &self,
        configuration: &Configuration,
        currency: Option<Currency>,
        locale: &str,
    ) -> ShopResult<PricedQuote> {
        let currency = currency.unwrap_or(self.options.base_currency);
        let settings = self.store.settings().await?;
        let quote =
            quote_configuration(self.store.as_ref(), configuration, &settings, locale).await?;
        let (amount, rate) = self.rates.convert(quote.total(), currency, &settings).await;
        Ok(PricedQuote {
            quote,
            amount,
            rate,
        })
    }

    async fn prepare(
        &self,
        request: &CheckoutRequest,
        settings: &SettingsSnapshot,
    ) -> ShopResult<PreparedCheckout> {
        match &request.flow {
            CheckoutFlow::Custom { configuration } => {
                if configuration.client_price.is_some() {
                    warn!(
                        function_option_id = %configuration.function_option_id,
                        "ignoring client-supplied price"
                    );
                }
                let quote = quote_configuration(
                    self.store.as_ref(),
                    configuration,
                    settings,
                    &request.locale,
                )
                .await?;
                let record = ConfigurationRecord::custom(
                    configuration.clone(),
                    quote.total(),
                    &quote.summary,
                );
                Ok(PreparedCheckout {
                    lines: vec![LineItem::new(&quote.title, quote.total(), 1)
                        .with_description(&quote.summary)],
                    free_shipping: settings.configurator_free_shipping,
                    metadata: SessionMetadata {
                        correlation_id: record.id.clone(),
                        flow: FlowKind::Custom,
                        user_id: None,
                        product_id: None,
                        summary: quote.summary,
                        manifest: StockManifest::default(),
                    },
                    record: Some(record),
                })
            }
            CheckoutFlow::Built { product_id } => {
                let product = self
                    .store
                    .product(product_id)
                    .await?
                    .ok_or_else(|| ShopError::ProductNotFound {
                        product_id: product_id.clone(),
                    })?;
                let blocked = |reason| ShopError::CartUnavailable {
                    item_id: product.id.clone(),
                    item: product.name.clone(),
                    reason,
                };
                if !product.active {
                    return Err(blocked(UnavailableReason::Inactive));
                }
                if product.stock == 0 {
                    return Err(blocked(UnavailableReason::InsufficientStock {
                        requested: 1,
                        available: 0,
                    }));
                }

                let record = ConfigurationRecord::built(&product.id, product.price, &product.name);
                Ok(PreparedCheckout {
                    lines: vec![LineItem::new(&product.name, product.price, 1)
                        .with_description(&product.description)
                        .with_image(product.image_url.clone())],
                    free_shipping: product.free_shipping,
                    metadata: SessionMetadata {
                        correlation_id: record.id.clone(),
                        flow: FlowKind::Built,
                        user_id: None,
                        product_id: Some(product.id.clone()),
                        summary: product.name.clone(),
                        manifest: StockManifest::default(),
                    },
                    record: Some(record),
                })
            }
            CheckoutFlow::Cart { user_id, items } => {
                let source = match (user_id, items) {
                    (Some(user_id), _) => CartSource::User(user_id.clone()),
                    (None, Some(items)) => CartSource::Guest(items.clone()),
                    (None, None) => {
                        return Err(ShopError::InvalidRequest("cart source missing".to_string()))
                    }
                };
                let cart = CartAggregator::new(self.store.as_ref(), self.options.price_policy)
                    .aggregate(&source, settings, &request.locale)
                    .await?;

                Ok(PreparedCheckout {
                    lines: cart
                        .lines
                        .iter()
                        .map(|line| {
                            LineItem::new(&line.name, line.unit_price, line.quantity)
                                .with_description(&line.description)
                                .with_image(line.image_url.clone())
                        })
                        .collect(),
                    free_shipping: cart.free_shipping,
                    record: None,
                    metadata: SessionMetadata {
                        correlation_id: Uuid::new_v4().to_string(),
                        flow: FlowKind::Cart,
                        user_id: source.user_id().map(String::from),
                        product_id: None,
                        summary: cart.summary(),
                        manifest: StockManifest(cart.stock_quantities()),
                    },
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::Product;
    use crate::configuration::ConfigurationStatus;
    use crate::fulfillment::CompletedCheckout;
    use crate::order::{CheckoutSession, WebhookEvent};
    use crate::resolver::tests::{watch_configuration, watch_tree};
    use crate::store::MemoryStore;
    use crate::strategy::PaymentStrategy;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records session requests instead of calling a processor
    #[derive(Default)]
    pub(crate) struct RecordingStrategy {
        pub(crate) requests: Mutex<Vec<SessionRequest>>,
    }

    #[async_trait]
    impl PaymentStrategy for RecordingStrategy {
        async fn create_checkout(&self, request: &SessionRequest) -> ShopResult<CheckoutSession> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            let session_id = format!("cs_test_{}", requests.len());
            Ok(CheckoutSession::new(
                &session_id,
                &request.correlation_id,
                "recording",
                format!("https://pay.example.com/{}", session_id),
            ))
        }

        async fn verify_webhook(
            &self,
            _payload: &[u8],
            _signature: &str,
        ) -> ShopResult<WebhookEvent> {
            Err(ShopError::InvalidSignature("not supported".into()))
        }

        fn completed_checkout(&self, _event: &WebhookEvent) -> ShopResult<CompletedCheckout> {
            Err(ShopError::WebhookParseError("not supported".into()))
        }

        fn provider_name(&self) -> &'static str {
            "recording"
        }
    }

    pub(crate) fn shop() -> MemoryStore {
        MemoryStore::new()
            .with_tree(watch_tree())
            .with_setting("global_discount_percent", "5")
            .with_product(Product::new("lamp", "Desk lamp", 4500, 10).with_free_shipping(true))
            .with_product(Product::new("vase", "Vase", 2000, 0))
            .with_product(Product::new("sticker", "Sticker", 20, 100))
    }

    fn service(store: &MemoryStore) -> (CheckoutService, Arc<RecordingStrategy>) {
        let strategy = Arc::new(RecordingStrategy::default());
        let service = CheckoutService::new(
            Arc::new(store.clone()),
            strategy.clone(),
            Arc::new(ExchangeRates::offline(Currency::EUR)),
            CheckoutOptions {
                shipping_countries: vec!["CZ".into(), "DE".into()],
                ..Default::default()
            },
        );
        (service, strategy)
    }

    #[tokio::test]
    async fn test_custom_checkout_persists_pending_configuration() {
        let store = shop();
        let (service, strategy) = service(&store);

        let mut configuration = watch_configuration();
        configuration.client_price = Some(1);
        let response = service
            .checkout(
                &CheckoutRequest::new(CheckoutFlow::Custom { configuration })
                    .with_email("a@example.com"),
            )
            .await
            .unwrap();

        assert_eq!(response.amount, Price::from_minor(66500, Currency::EUR));
        let records = store.configurations();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ConfigurationStatus::Pending);
        assert_eq!(records[0].id, response.correlation_id);
        assert_eq!(records[0].total, 66500);

        let requests = strategy.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.total().unwrap(), 66500);
        assert_eq!(request.metadata.get("flow").map(String::as_str), Some("custom"));
        assert_eq!(request.metadata.get("correlation_id"), Some(&response.correlation_id));
        assert_eq!(request.shipping_countries, vec!["CZ".to_string(), "DE".to_string()]);
        assert!(request.success_url.contains("{CHECKOUT_SESSION_ID}"));
    }

    #[tokio::test]
    async fn test_guest_cart_with_unavailable_item_has_no_side_effects() {
        let store = shop();
        let (service, strategy) = service(&store);

        let flow = CheckoutFlow::Cart {
            user_id: None,
            items: Some(vec![
                CartItem::product("lamp", 1).with_title("Desk lamp"),
                CartItem::product("vase", 1).with_title("Vase"),
            ]),
        };
        let err = service.checkout(&CheckoutRequest::new(flow)).await.unwrap_err();

        assert!(matches!(err, ShopError::CartUnavailable { ref item, .. } if item == "Vase"));
        assert!(store.configurations().is_empty());
        assert!(strategy.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cart_amount_overflow_is_rejected() {
        let store = shop();
        let strategy = Arc::new(RecordingStrategy::default());
        let service = CheckoutService::new(
            Arc::new(store.clone()),
            strategy.clone(),
            Arc::new(ExchangeRates::offline(Currency::EUR)),
            CheckoutOptions {
                price_policy: CustomPricePolicy::PreferRecorded,
                ..Default::default()
            },
        );
        let huge = i64::MAX / 2 + 1;

        let carts = [
            vec![CartItem::product("lamp", 2).with_recorded_price(huge)],
            vec![
                CartItem::product("lamp", 1).with_recorded_price(huge),
                CartItem::product("sticker", 1).with_recorded_price(huge),
            ],
        ];
        for items in carts {
            let flow = CheckoutFlow::Cart {
                user_id: None,
                items: Some(items),
            };
            let err = service.checkout(&CheckoutRequest::new(flow)).await.unwrap_err();
            assert!(matches!(err, ShopError::InvalidRequest(_)));
        }
        assert!(strategy.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_below_minimum_is_rejected_before_persistence() {
        let store = shop();
        let (service, strategy) = service(&store);

        let err = service
            .checkout(&CheckoutRequest::new(CheckoutFlow::Built {
                product_id: "sticker".into(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShopError::BelowMinimumOrderAmount { amount: 20, minimum: 50, .. }
        ));

        // 20 EUR cents is also below the CZK minimum after conversion
        let err = service
            .checkout(
                &CheckoutRequest::new(CheckoutFlow::Built {
                    product_id: "sticker".into(),
                })
                .with_currency(Currency::CZK),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::BelowMinimumOrderAmount { minimum: 1500, .. }));

        assert!(store.configurations().is_empty());
        assert!(strategy.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_built_checkout_converts_currency() {
        let store = shop().with_setting("exchange_rate.usd", "1.1");
        let (service, strategy) = service(&store);

        let response = service
            .checkout(
                &CheckoutRequest::new(CheckoutFlow::Built {
                    product_id: "lamp".into(),
                })
                .with_currency(Currency::USD),
            )
            .await
            .unwrap();
        assert_eq!(response.amount, Price::from_minor(4950, Currency::USD));

        let requests = strategy.requests.lock().unwrap();
        assert!(requests[0].free_shipping);
        assert_eq!(requests[0].metadata.get("product_id").map(String::as_str), Some("lamp"));
        assert_eq!(store.configurations()[0].product_id.as_deref(), Some("lamp"));
    }

    #[tokio::test]
    async fn test_out_of_stock_built_product() {
        let store = shop();
        let (service, _) = service(&store);

        let err = service
            .checkout(&CheckoutRequest::new(CheckoutFlow::Built {
                product_id: "vase".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert!(store.configurations().is_empty());
    }

    #[tokio::test]
    async fn test_user_cart_metadata_carries_manifest() {
        let store = shop().with_cart(
            "u1",
            vec![CartItem::product("lamp", 2), CartItem::custom(watch_configuration(), 1)],
        );
        let (service, strategy) = service(&store);

        let flow = CheckoutFlow::Cart {
            user_id: Some("u1".into()),
            items: None,
        };
        service.checkout(&CheckoutRequest::new(flow)).await.unwrap();

        let requests = strategy.requests.lock().unwrap();
        let metadata = SessionMetadata::from_map(&requests[0].metadata).unwrap();
        assert_eq!(metadata.flow, FlowKind::Cart);
        assert_eq!(metadata.user_id.as_deref(), Some("u1"));
        assert_eq!(metadata.manifest, StockManifest(vec![("lamp".into(), 2)]));
        assert_eq!(requests[0].total().unwrap(), 9000 + 66500);
        assert!(store.configurations().is_empty());
    }

    #[tokio::test]
    async fn test_quote_does_not_persist() {
        let store = shop();
        let (service, _) = service(&store);

        let priced = service
            .quote(&watch_configuration(), Some(Currency::EUR), "en")
            .await
            .unwrap();
        assert_eq!(priced.amount.amount, 66500);
        assert!(store.configurations().is_empty());
    }

    #[test]
    fn test_request_validation() {
        let both = CheckoutRequest::new(CheckoutFlow::Cart {
            user_id: Some("u1".into()),
            items: Some(vec![]),
        });
        assert!(both.validate().is_err());

        let neither = CheckoutRequest::new(CheckoutFlow::Cart {
            user_id: None,
            items: None,
        });
        assert!(neither.validate().is_err());

        let zero = CheckoutRequest::new(CheckoutFlow::Cart {
            user_id: None,
            items: Some(vec![CartItem::product("lamp", 0)]),
        });
        assert!(zero.validate().is_err());

        let bad_email = CheckoutRequest::new(CheckoutFlow::Built {
            product_id: "lamp".into(),
        })
        .with_email("nope");
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_tagged_payload_parsing() {
        let request: CheckoutRequest = serde_json::from_str(
            r#"{"type":"built","product_id":"lamp","currency":"usd","locale":"cs"}"#,
        )
        .unwrap();
        assert!(matches!(
            request.flow,
            CheckoutFlow::Built { ref product_id } if product_id == "lamp"
        ));
        assert_eq!(request.currency, Some(Currency::USD));
        assert_eq!(request.locale, "cs");

        let request: CheckoutRequest = serde_json::from_str(
            r#"{"type":"cart","items":[{"id":"lamp","quantity":2}]}"#,
        )
        .unwrap();
        assert_eq!(request.flow.kind(), FlowKind::Cart);
        assert_eq!(request.locale, "en");

        assert!(serde_json::from_str::<CheckoutRequest>(r#"{"type":"subscription"}"#).is_err());
        assert!(serde_json::from_str::<CheckoutRequest>(r#"{"product_id":"lamp"}"#).is_err());
    }

    #[test]
    fn test_manifest_chunks_respect_limit() {
        let manifest = StockManifest(
            (0..60)
                .map(|i| (format!("product-with-a-long-identifier-{:03}", i), i + 1))
                .collect(),
        );
        let chunks = manifest.encode(METADATA_VALUE_LIMIT);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= METADATA_VALUE_LIMIT));

        let metadata = SessionMetadata {
            correlation_id: "c1".into(),
            flow: FlowKind::Cart,
            user_id: None,
            product_id: None,
            summary: "x".repeat(800),
            manifest: manifest.clone(),
        };
        let map = metadata.to_map();
        assert_eq!(map.get("summary").map(|s| s.chars().count()), Some(METADATA_VALUE_LIMIT));
        let decoded = SessionMetadata::from_map(&map).unwrap();
        assert_eq!(decoded.manifest, manifest);
    }

    #[test]
    fn test_manifest_ids_with_separators() {
        let manifest = StockManifest(vec![
            ("lamp,oak".to_string(), 2),
            ("50%-off:bulb".to_string(), 1),
            ("vase".to_string(), 3),
        ]);
        let chunks = manifest.encode(METADATA_VALUE_LIMIT);
        assert_eq!(chunks, vec!["lamp%2Coak:2,50%25-off:bulb:1,vase:3".to_string()]);
        assert_eq!(StockManifest::decode(chunks.iter().map(String::as_str)).unwrap(), manifest);

        assert!(StockManifest::decode(["lamp%2:1"]).is_err());
    }

    #[test]
    fn test_metadata_requires_flow_and_correlation() {
        let mut map = BTreeMap::new();
        map.insert("flow".to_string(), "cart".to_string());
        assert!(matches!(
            SessionMetadata::from_map(&map),
            Err(ShopError::WebhookParseError(_))
        ));
    }
}
