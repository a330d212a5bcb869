//! # Payment Strategy Trait
//!
//! Strategy pattern trait for the payment processor. The pipeline builds a
//! provider-neutral [`SessionRequest`] and consumes a provider-neutral
//! [`CompletedCheckout`]; everything provider-specific lives behind this
//! trait.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PaymentStrategy (trait)                  │
//! │  ├── create_checkout()                                      │
//! │  ├── verify_webhook()                                       │
//! │  ├── completed_checkout()                                   │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                    ┌───────┴───────┐
//!                    │StripeCheckout │
//!                    │   Strategy    │
//!                    └───────────────┘
//! ```

use crate::checkout::SessionRequest;
use crate::error::ShopResult;
use crate::fulfillment::CompletedCheckout;
use crate::order::{CheckoutSession, WebhookEvent};
use async_trait::async_trait;
use std::sync::Arc;

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentStrategy: Send + Sync {
    /// Create a hosted checkout session and return the redirect URL.
    async fn create_checkout(&self, request: &SessionRequest) -> ShopResult<CheckoutSession>;

    /// Verify a webhook signature and parse the event.
    ///
    /// # Arguments
    /// * `payload` - Raw webhook body bytes
    /// * `signature` - Signature header from the request
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> ShopResult<WebhookEvent>;

    /// Extract the completed checkout from a verified
    /// [`WebhookEventType::CheckoutCompleted`](crate::order::WebhookEventType) event.
    fn completed_checkout(&self, event: &WebhookEvent) -> ShopResult<CompletedCheckout>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;

    /// Get the webhook endpoint path for this provider.
    /// Default: `/webhook/{provider_name}`
    fn webhook_path(&self) -> String {
        format!("/webhook/{}", self.provider_name())
    }
}

/// Type alias for a boxed payment strategy (dynamic dispatch)
pub type BoxedPaymentStrategy = Arc<dyn PaymentStrategy>;

/// Placeholder the processor replaces with the real session id
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Configuration for URLs used in checkout
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the application (e.g., "https://shop.example.com")
    pub base_url: String,
    /// Success page path (e.g., "/checkout/success")
    pub success_path: String,
    /// Cancel page path (e.g., "/checkout/cancel")
    pub cancel_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            success_path: "/checkout/success".to_string(),
            cancel_path: "/checkout/cancel".to_string(),
        }
    }

    /// Success URL carrying the processor's session id placeholder
    pub fn success_url(&self) -> String {
        format!(
            "{}{}?session_id={}",
            self.base_url, self.success_path, SESSION_ID_PLACEHOLDER
        )
    }

    pub fn cancel_url(&self) -> String {
        format!("{}{}", self.base_url, self.cancel_path)
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}
