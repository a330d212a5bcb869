//! # Stripe Checkout Sessions
//!
//! Implementation of the Stripe Checkout Sessions API behind
//! [`PaymentStrategy`].

use crate::config::StripeConfig;
use crate::webhook;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_core::{
    CheckoutSession, CompletedCheckout, PaymentStrategy, SessionRequest, ShopError, ShopResult,
    WebhookEvent,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Checkout page locales Stripe accepts; anything else becomes `auto`
const STRIPE_LOCALES: &[&str] = &[
    "bg", "cs", "da", "de", "el", "en", "en-GB", "es", "es-419", "et", "fi", "fil", "fr",
    "fr-CA", "hr", "hu", "id", "it", "ja", "ko", "lt", "lv", "ms", "mt", "nb", "nl", "pl", "pt",
    "pt-BR", "ro", "ru", "sk", "sl", "sv", "th", "tr", "vi", "zh", "zh-HK", "zh-TW",
];

/// Stripe Checkout Session strategy
///
/// Uses Stripe's hosted checkout page, so card data never touches the shop.
pub struct StripeCheckoutStrategy {
    config: StripeConfig,
    client: Client,
}

impl StripeCheckoutStrategy {
    pub fn new(config: StripeConfig) -> ShopResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ShopError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> ShopResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn stripe_locale(locale: &str) -> &str {
        STRIPE_LOCALES
            .iter()
            .find(|l| l.eq_ignore_ascii_case(locale))
            .copied()
            .unwrap_or("auto")
    }

    /// Form body for `POST /v1/checkout/sessions`
    fn build_form(request: &SessionRequest) -> Vec<(String, String)> {
        let currency = request.currency.as_str();
        let mut form: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("client_reference_id".to_string(), request.correlation_id.clone()),
            (
                "locale".to_string(),
                Self::stripe_locale(&request.locale).to_string(),
            ),
        ];

        for (i, item) in request.lines.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((
                format!("{}[price_data][currency]", prefix),
                currency.to_string(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount.to_string(),
            ));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            if let Some(description) = &item.description {
                form.push((
                    format!("{}[price_data][product_data][description]", prefix),
                    description.clone(),
                ));
            }
            if let Some(image) = &item.image_url {
                form.push((
                    format!("{}[price_data][product_data][images][0]", prefix),
                    image.clone(),
                ));
            }
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }

        for (i, country) in request.shipping_countries.iter().enumerate() {
            form.push((
                format!("shipping_address_collection[allowed_countries][{}]", i),
                country.clone(),
            ));
        }

        if request.free_shipping {
            let rate = "shipping_options[0][shipping_rate_data]";
            form.push((format!("{}[type]", rate), "fixed_amount".to_string()));
            form.push((format!("{}[fixed_amount][amount]", rate), "0".to_string()));
            form.push((format!("{}[fixed_amount][currency]", rate), currency.to_string()));
            form.push((format!("{}[display_name]", rate), "Free shipping".to_string()));
        }

        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        form
    }

    fn error_from_response(status: StatusCode, retry_after: Option<u64>, body: &str) -> ShopError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ShopError::RateLimited {
                provider: "stripe".to_string(),
                retry_after_secs: retry_after.unwrap_or(1),
            };
        }

        let message = serde_json::from_str::<StripeErrorResponse>(body)
            .map(|e| match e.error.code {
                Some(code) => format!("{} ({})", e.error.message, code),
                None => e.error.message,
            })
            .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

        ShopError::ProviderError {
            provider: "stripe".to_string(),
            message,
        }
    }
}

#[async_trait]
impl PaymentStrategy for StripeCheckoutStrategy {
    #[instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    async fn create_checkout(&self, request: &SessionRequest) -> ShopResult<CheckoutSession> {
        if request.lines.is_empty() {
            return Err(ShopError::InvalidRequest(
                "checkout has no line items".to_string(),
            ));
        }

        let form = Self::build_form(request);
        debug!(
            lines = request.lines.len(),
            currency = %request.currency,
            "creating Stripe checkout session"
        );

        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| ShopError::NetworkError(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response
            .text()
            .await
            .map_err(|e| ShopError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            error!(%status, body = %body, "Stripe API error");
            return Err(Self::error_from_response(status, retry_after, &body));
        }

        let session: StripeCheckoutSessionResponse = serde_json::from_str(&body).map_err(|e| {
            ShopError::Serialization(format!("failed to parse Stripe response: {}", e))
        })?;

        let checkout_url = session.url.ok_or_else(|| ShopError::ProviderError {
            provider: "stripe".to_string(),
            message: format!("session {} has no checkout url", session.id),
        })?;

        info!(session_id = %session.id, "created Stripe checkout session");

        let mut checkout = CheckoutSession::new(
            session.id,
            request.correlation_id.clone(),
            "stripe",
            checkout_url,
        );
        checkout.expires_at = session
            .expires_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
        Ok(checkout)
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> ShopResult<WebhookEvent> {
        webhook::verify_signature(
            &self.config.webhook_secret,
            payload,
            signature,
            Utc::now().timestamp(),
            self.config.webhook_tolerance_secs,
        )?;
        webhook::parse_event(payload)
    }

    fn completed_checkout(&self, event: &WebhookEvent) -> ShopResult<CompletedCheckout> {
        webhook::completed_checkout(event)
    }

    fn provider_name(&self) -> &'static str {
        "stripe"
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::{Currency, LineItem, WebhookEventType};
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_request() -> SessionRequest {
        let mut metadata = BTreeMap::new();
        metadata.insert("correlation_id".to_string(), "cfg_1".to_string());
        metadata.insert("flow".to_string(), "custom".to_string());

        SessionRequest {
            correlation_id: "cfg_1".to_string(),
            lines: vec![
                LineItem::new("Watch", 66500, 1).with_description("Steel, Blue"),
                LineItem::new("Lamp", 4500, 2)
                    .with_image(Some("https://cdn.example.com/lamp.jpg".into())),
            ],
            currency: Currency::EUR,
            free_shipping: true,
            shipping_countries: vec!["CZ".to_string(), "SK".to_string()],
            customer_email: Some("jana@example.com".to_string()),
            locale: "cs".to_string(),
            metadata,
            success_url: "https://shop.example.com/checkout/success?session_id={CHECKOUT_SESSION_ID}"
                .to_string(),
            cancel_url: "https://shop.example.com/checkout/cancel".to_string(),
            idempotency_key: "idem-cfg_1".to_string(),
        }
    }

    fn strategy(server: &MockServer) -> StripeCheckoutStrategy {
        let config = StripeConfig::new("sk_test_abc", "pk_test_abc", "whsec_abc")
            .with_api_base_url(server.uri());
        StripeCheckoutStrategy::new(config).unwrap()
    }

    fn value<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_build_form() {
        let form = StripeCheckoutStrategy::build_form(&session_request());

        assert_eq!(value(&form, "mode"), Some("payment"));
        assert_eq!(value(&form, "locale"), Some("cs"));
        assert_eq!(value(&form, "line_items[0][price_data][currency]"), Some("eur"));
        assert_eq!(value(&form, "line_items[0][price_data][unit_amount]"), Some("66500"));
        assert_eq!(
            value(&form, "line_items[0][price_data][product_data][description]"),
            Some("Steel, Blue")
        );
        assert_eq!(value(&form, "line_items[1][quantity]"), Some("2"));
        assert_eq!(
            value(&form, "line_items[1][price_data][product_data][images][0]"),
            Some("https://cdn.example.com/lamp.jpg")
        );
        assert_eq!(value(&form, "shipping_address_collection[allowed_countries][1]"), Some("SK"));
        assert_eq!(
            value(&form, "shipping_options[0][shipping_rate_data][fixed_amount][amount]"),
            Some("0")
        );
        assert_eq!(value(&form, "metadata[flow]"), Some("custom"));
        assert_eq!(value(&form, "customer_email"), Some("jana@example.com"));
    }

    #[test]
    fn test_no_shipping_option_without_free_shipping() {
        let mut request = session_request();
        request.free_shipping = false;
        request.locale = "xx".to_string();
        let form = StripeCheckoutStrategy::build_form(&request);

        assert!(form.iter().all(|(k, _)| !k.starts_with("shipping_options")));
        assert_eq!(value(&form, "locale"), Some("auto"));
    }

    #[tokio::test]
    async fn test_create_checkout_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("Idempotency-Key", "idem-cfg_1"))
            .and(header("Authorization", "Bearer sk_test_abc"))
            .and(body_string_contains("mode=payment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_abc",
                "url": "https://checkout.stripe.com/c/pay/cs_test_abc",
                "expires_at": 1_900_000_000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = strategy(&server)
            .create_checkout(&session_request())
            .await
            .unwrap();

        assert_eq!(session.session_id, "cs_test_abc");
        assert_eq!(session.correlation_id, "cfg_1");
        assert_eq!(session.checkout_url, "https://checkout.stripe.com/c/pay/cs_test_abc");
        assert!(session.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_provider_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "Amount must be at least €0.50 eur", "code": "amount_too_small" }
            })))
            .mount(&server)
            .await;

        let err = strategy(&server)
            .create_checkout(&session_request())
            .await
            .unwrap_err();

        match err {
            ShopError::ProviderError { provider, message } => {
                assert_eq!(provider, "stripe");
                assert!(message.contains("amount_too_small"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_retryable_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = strategy(&server)
            .create_checkout(&session_request())
            .await
            .unwrap_err();

        assert!(matches!(err, ShopError::RateLimited { retry_after_secs: 7, .. }));
    }

    #[tokio::test]
    async fn test_empty_request_never_hits_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let mut request = session_request();
        request.lines.clear();
        let err = strategy(&server).create_checkout(&request).await.unwrap_err();
        assert!(matches!(err, ShopError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_verify_webhook() {
        let server = MockServer::start().await;
        let strategy = strategy(&server);
        let payload = serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.expired",
            "created": Utc::now().timestamp(),
            "data": { "object": { "id": "cs_test_abc" } }
        })
        .to_string();
        let header_value =
            webhook::signature_header("whsec_abc", payload.as_bytes(), Utc::now().timestamp())
                .unwrap();

        let event = strategy
            .verify_webhook(payload.as_bytes(), &header_value)
            .await
            .unwrap();
        assert_eq!(event.event_type, WebhookEventType::CheckoutExpired);

        let err = strategy
            .verify_webhook(payload.as_bytes(), "t=1,v1=00")
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::InvalidSignature(_)));
    }
}
