//! # Request Handlers
//!
//! Axum request handlers for the storefront API.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use forge_core::{
    CheckoutRequest, CheckoutResponse, Configuration, Currency, FulfillmentOutcome, PricedQuote,
    ShopError, WebhookEventType,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

fn default_locale() -> String {
    "en".to_string()
}

/// Quote request
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub configuration: Configuration,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default = "default_locale")]
    pub locale: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Webhook acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FulfillmentOutcome>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a pipeline error to a response with a customer-facing message.
///
/// Internal details are logged here and never returned.
fn shop_error_to_response(err: ShopError, locale: &str) -> ApiError {
    let code = err.status_code();
    if code >= 500 {
        error!(error = %err, "request failed");
    } else {
        warn!(error = %err, "request rejected");
    }

    let mut response = ErrorResponse::new(err.user_message(locale), code);
    if let ShopError::CartUnavailable { item_id, .. } = &err {
        response = response.with_details(item_id.clone());
    }
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

/// Parse a JSON body into a typed request, rejecting unknown shapes
fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        shop_error_to_response(ShopError::InvalidRequest(e.to_string()), "en")
    })
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "forgecart",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.strategy.provider_name(),
        "base_currency": state.config.base_currency,
    }))
}

/// Create a checkout session for one of the three flows
#[instrument(skip_all)]
pub async fn create_checkout(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let request: CheckoutRequest = parse_body(&body)?;

    let response = state
        .checkout
        .checkout(&request)
        .await
        .map_err(|e| shop_error_to_response(e, &request.locale))?;

    info!(
        session_id = %response.session_id,
        flow = %response.flow,
        "checkout created"
    );
    Ok(Json(response))
}

/// Price a configuration without persisting anything
#[instrument(skip_all)]
pub async fn quote(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PricedQuote>, ApiError> {
    let request: QuoteRequest = parse_body(&body)?;

    let quote = state
        .checkout
        .quote(&request.configuration, request.currency, &request.locale)
        .await
        .map_err(|e| shop_error_to_response(e, &request.locale))?;

    Ok(Json(quote))
}

/// Payment processor webhook.
///
/// Signature and parse failures are rejected with 400. Fulfillment errors
/// that a redelivery can fix answer 503 so the processor retries; the rest
/// are logged and acknowledged.
#[instrument(skip_all)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Missing Stripe-Signature header", 400)),
            )
        })?;

    let event = state
        .strategy
        .verify_webhook(&body, signature)
        .await
        .map_err(|e| {
            error!(error = %e, "webhook verification failed");
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new("Invalid webhook", 400)))
        })?;

    info!(event_id = %event.event_id, event_type = ?event.event_type, "received webhook");

    if event.event_type != WebhookEventType::CheckoutCompleted {
        return Ok(Json(WebhookAck {
            received: true,
            outcome: None,
        }));
    }

    let completed = state.strategy.completed_checkout(&event).map_err(|e| {
        error!(error = %e, "unreadable checkout session");
        (StatusCode::BAD_REQUEST, Json(ErrorResponse::new("Invalid webhook", 400)))
    })?;

    match state.fulfillment.handle(&completed).await {
        Ok(outcome) => Ok(Json(WebhookAck {
            received: true,
            outcome: Some(outcome),
        })),
        Err(err) if err.is_retryable() => {
            error!(
                session_id = %completed.session_id,
                error = %err,
                "fulfillment failed, requesting redelivery"
            );
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("Temporary failure", 503)),
            ))
        }
        Err(err) => {
            error!(
                session_id = %completed.session_id,
                error = %err,
                "fulfillment rejected, not retrying"
            );
            Ok(Json(WebhookAck {
                received: true,
                outcome: Some(FulfillmentOutcome::Ignored {
                    reason: "rejected".to_string(),
                }),
            }))
        }
    }
}

/// Escape text for HTML bodies
fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const PAGE_STYLE: &str = "font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #f4f1ec;";

/// Checkout success page.
///
/// The order may not exist yet when the customer lands here; fulfillment
/// runs when the webhook arrives.
pub async fn checkout_success(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let session_id = params
        .get("session_id")
        .map(|s| escape_html(s))
        .unwrap_or_else(|| "unknown".to_string());
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Thank you</title></head>
<body style="{}">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <h1>Thank you for your order</h1>
        <p>We are confirming your payment. A confirmation email is on its way.</p>
        <p style="color: #666;">Reference: <code>{}</code></p>
    </div>
</body>
</html>
"#,
        PAGE_STYLE, session_id
    ))
}

/// Checkout cancel page
pub async fn checkout_cancel() -> impl IntoResponse {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Payment cancelled</title></head>
<body style="{}">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <h1>Payment cancelled</h1>
        <p style="color: #666;">No charges were made. Your selection is still waiting for you.</p>
    </div>
</body>
</html>
"#,
        PAGE_STYLE
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::UnavailableReason;

    #[test]
    fn test_availability_error_names_item_only() {
        let err = ShopError::CartUnavailable {
            item_id: "vase".into(),
            item: "Vase".into(),
            reason: UnavailableReason::InsufficientStock {
                requested: 1,
                available: 0,
            },
        };
        let (status, Json(body)) = shop_error_to_response(err, "en");
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.error.contains("Vase"));
        assert_eq!(body.details.as_deref(), Some("vase"));
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = ShopError::Persistence("relation \"orders\" does not exist".into());
        let (status, Json(body)) = shop_error_to_response(err, "cs");
        assert!(status.is_server_error());
        assert!(!body.error.contains("orders"));
        assert!(body.details.is_none());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"
        );
    }
}
