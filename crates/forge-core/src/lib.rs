//! # forge-core
//!
//! Pricing and fulfillment pipeline for the forgecart storefront.
//!
//! This crate provides:
//! - Catalog, configuration, cart and order types
//! - The Configuration Resolver and Price Calculator (`resolver`, `pricing`)
//! - The Cart Aggregator (`cart`)
//! - The Checkout Session Builder (`checkout`)
//! - The Fulfillment Webhook Handler (`fulfillment`)
//! - Store, payment, notification and exchange-rate traits, plus an
//!   in-memory store
//! - `ShopError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use forge_core::{CheckoutFlow, CheckoutRequest, CheckoutService, Currency};
//!
//! let service = CheckoutService::new(store, strategy, rates, options);
//! let request = CheckoutRequest::new(CheckoutFlow::Built { product_id: "lamp".into() })
//!     .with_currency(Currency::USD);
//!
//! // Redirect the customer to response.checkout_url
//! let response = service.checkout(&request).await?;
//! ```

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod configuration;
pub mod error;
pub mod fulfillment;
pub mod fx;
pub mod money;
pub mod notify;
pub mod order;
pub mod pricing;
pub mod quote;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod strategy;

// Re-exports for convenience
pub use cart::{
    AggregatedCart, CartAggregator, CartItem, CartSource, CustomPricePolicy, PriceSource,
    SellableLine, CUSTOM_ITEM_PREFIX,
};
pub use catalog::{
    Addon, FunctionOption, FunctionStep, FunctionTree, LocalizedText, Product, Step, StepOption,
};
pub use checkout::{
    CheckoutFlow, CheckoutOptions, CheckoutRequest, CheckoutResponse, CheckoutService,
    PricedQuote, SessionMetadata, SessionRequest, StockManifest,
};
pub use configuration::{Configuration, ConfigurationRecord, ConfigurationStatus};
pub use error::{ErrorCategory, ShopError, ShopResult, UnavailableReason};
pub use fulfillment::{CompletedCheckout, FulfillmentHandler, FulfillmentOutcome};
pub use fx::{ExchangeRates, RateOrigin, RateQuote, RateSource};
pub use money::{Currency, Price};
pub use notify::{Email, LogNotifier, Notifier, SharedNotifier};
pub use order::{
    CheckoutSession, FlowKind, LineItem, Order, OrderStatus, PaymentStatus,
    ShippingAddress, WebhookEvent, WebhookEventType,
};
pub use pricing::{PriceBreakdown, PriceCalculator};
pub use quote::{price_tree, quote_configuration, Quote};
pub use resolver::{resolve, IgnoredSelection, LineKind, ResolvedConfiguration, ResolvedLine};
pub use settings::{SettingRow, SettingsSnapshot};
pub use store::{
    CartStore, CatalogSeed, CatalogStore, ConfigurationStore, InsertOutcome, InventoryStore,
    MemoryStore, OrderStore, SharedStore, ShopStore, StockChange, StockMovement,
};
pub use strategy::{BoxedPaymentStrategy, CheckoutUrls, PaymentStrategy};
