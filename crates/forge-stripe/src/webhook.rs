//! # Stripe Webhook Handling
//!
//! `Stripe-Signature` verification and parsing of the checkout session
//! object carried by `checkout.session.completed`.

use chrono::{DateTime, Utc};
use forge_core::{
    CompletedCheckout, Currency, PaymentStatus, ShippingAddress, ShopError, ShopResult,
    WebhookEvent, WebhookEventType,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Events that must be enabled on the Stripe webhook endpoint
pub const REQUIRED_WEBHOOK_EVENTS: &[&str] =
    &["checkout.session.completed", "checkout.session.expired"];

// =============================================================================
// Signature Verification
// =============================================================================

#[derive(Debug)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> ShopResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        ShopError::InvalidSignature("missing timestamp in signature".to_string())
    })?;

    if signatures.is_empty() {
        return Err(ShopError::InvalidSignature(
            "no v1 signature found".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> ShopResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ShopError::Configuration(format!("invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Check a `Stripe-Signature` header against the raw payload.
///
/// Any `v1` signature may match; the comparison is constant-time.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
    tolerance_secs: i64,
) -> ShopResult<()> {
    let parsed = parse_signature_header(header)?;

    if (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(ShopError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let valid = parsed.signatures.iter().any(|candidate| {
        let Ok(bytes) = hex::decode(candidate) else {
            return false;
        };
        mac_for(secret, parsed.timestamp, payload)
            .map(|mac| mac.verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if valid {
        Ok(())
    } else {
        Err(ShopError::InvalidSignature("signature mismatch".to_string()))
    }
}

/// Build a `Stripe-Signature` header value for a payload.
///
/// Used by local tooling and tests to produce deliveries the endpoint accepts.
pub fn signature_header(secret: &str, payload: &[u8], timestamp: i64) -> ShopResult<String> {
    let mac = mac_for(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

// =============================================================================
// Event Parsing
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

/// Parse a verified payload into a provider-neutral event
pub fn parse_event(payload: &[u8]) -> ShopResult<WebhookEvent> {
    let event: StripeWebhookEvent = serde_json::from_slice(payload)
        .map_err(|e| ShopError::WebhookParseError(format!("failed to parse webhook: {}", e)))?;

    debug!(event_id = %event.id, event_type = %event.event_type, "parsed Stripe event");

    let event_type = match event.event_type.as_str() {
        "checkout.session.completed" => WebhookEventType::CheckoutCompleted,
        "checkout.session.expired" => WebhookEventType::CheckoutExpired,
        other => WebhookEventType::Unknown(other.to_string()),
    };

    Ok(WebhookEvent {
        event_id: event.id,
        event_type,
        provider: "stripe".to_string(),
        data: event.data.object,
        timestamp: DateTime::from_timestamp(event.created, 0).unwrap_or_else(Utc::now),
    })
}

#[derive(Debug, Default, Deserialize)]
struct StripeSession {
    id: String,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    shipping_details: Option<ShippingDetails>,
    #[serde(default)]
    collected_information: Option<CollectedInformation>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<StripeAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct CollectedInformation {
    #[serde(default)]
    shipping_details: Option<ShippingDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct ShippingDetails {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<StripeAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct StripeAddress {
    #[serde(default)]
    line1: Option<String>,
    #[serde(default)]
    line2: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl StripeAddress {
    fn into_shipping(self, name: Option<String>) -> Option<ShippingAddress> {
        let line1 = self.line1.filter(|l| !l.is_empty())?;
        Some(ShippingAddress {
            name,
            line1,
            line2: self.line2,
            city: self.city.unwrap_or_default(),
            postal_code: self.postal_code.unwrap_or_default(),
            state: self.state,
            country: self.country.unwrap_or_default(),
        })
    }
}

/// Extract a [`CompletedCheckout`] from a checkout session object.
///
/// The address comes from `shipping_details`, then
/// `collected_information.shipping_details`, then the customer's billing
/// address.
pub fn completed_checkout(event: &WebhookEvent) -> ShopResult<CompletedCheckout> {
    if event.event_type != WebhookEventType::CheckoutCompleted {
        return Err(ShopError::WebhookParseError(format!(
            "expected checkout.session.completed, got {:?}",
            event.event_type
        )));
    }

    let session: StripeSession = serde_json::from_value(event.data.clone())
        .map_err(|e| ShopError::WebhookParseError(format!("invalid session object: {}", e)))?;

    let currency = session.currency.as_deref().and_then(|code| {
        code.parse::<Currency>()
            .map_err(|e| warn!(session_id = %session.id, error = %e, "unknown session currency"))
            .ok()
    });

    let details = session.customer_details.unwrap_or_default();
    let shipping = session
        .shipping_details
        .or_else(|| session.collected_information.and_then(|c| c.shipping_details));
    let shipping_address = match shipping {
        Some(ShippingDetails {
            name,
            address: Some(address),
        }) => address.into_shipping(name),
        _ => details
            .address
            .and_then(|address| address.into_shipping(details.name.clone())),
    };

    Ok(CompletedCheckout {
        session_id: session.id,
        payment_status: PaymentStatus::parse(session.payment_status.as_deref().unwrap_or("")),
        amount_total: session.amount_total,
        currency,
        customer_email: details.email.or(session.customer_email),
        shipping_address,
        metadata: session.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";

    fn completed_payload() -> Vec<u8> {
        json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": {
                "object": {
                    "id": "cs_test_123",
                    "payment_status": "paid",
                    "amount_total": 66500,
                    "currency": "eur",
                    "customer_details": {
                        "email": "jana@example.com",
                        "name": "Jana Novak",
                        "address": { "line1": "Billing 1", "city": "Brno", "postal_code": "60200", "country": "CZ" }
                    },
                    "collected_information": {
                        "shipping_details": {
                            "name": "Jana Novak",
                            "address": {
                                "line1": "Dlouha 5",
                                "line2": null,
                                "city": "Praha",
                                "postal_code": "11000",
                                "state": null,
                                "country": "CZ"
                            }
                        }
                    },
                    "metadata": { "correlation_id": "cfg_1", "flow": "custom" }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_parse_signature_header() {
        let parsed = parse_signature_header("t=1234567890,v1=abc123,v0=zzz,v1=def456").unwrap();
        assert_eq!(parsed.timestamp, 1234567890);
        assert_eq!(parsed.signatures, vec!["abc123", "def456"]);
    }

    #[test]
    fn test_parse_signature_header_requires_parts() {
        assert!(matches!(
            parse_signature_header("v1=abc"),
            Err(ShopError::InvalidSignature(_))
        ));
        assert!(matches!(
            parse_signature_header("t=123"),
            Err(ShopError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_signature_round_trip() {
        let payload = completed_payload();
        let header = signature_header(SECRET, &payload, 1_700_000_000).unwrap();
        assert!(verify_signature(SECRET, &payload, &header, 1_700_000_100, 300).is_ok());
    }

    #[test]
    fn test_signature_rejects_tampered_payload() {
        let payload = completed_payload();
        let header = signature_header(SECRET, &payload, 1_700_000_000).unwrap();
        let mut tampered = payload.clone();
        tampered.push(b' ');
        assert!(matches!(
            verify_signature(SECRET, &tampered, &header, 1_700_000_000, 300),
            Err(ShopError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_signature_rejects_wrong_secret_and_stale_timestamp() {
        let payload = completed_payload();
        let header = signature_header("whsec_other", &payload, 1_700_000_000).unwrap();
        assert!(verify_signature(SECRET, &payload, &header, 1_700_000_000, 300).is_err());

        let header = signature_header(SECRET, &payload, 1_700_000_000).unwrap();
        assert!(verify_signature(SECRET, &payload, &header, 1_700_000_301, 300).is_err());
    }

    #[test]
    fn test_parse_completed_session() {
        let event = parse_event(&completed_payload()).unwrap();
        assert_eq!(event.event_type, WebhookEventType::CheckoutCompleted);

        let checkout = completed_checkout(&event).unwrap();
        assert_eq!(checkout.session_id, "cs_test_123");
        assert_eq!(checkout.payment_status, PaymentStatus::Paid);
        assert_eq!(checkout.amount_total, Some(66500));
        assert_eq!(checkout.currency, Some(Currency::EUR));
        assert_eq!(checkout.customer_email.as_deref(), Some("jana@example.com"));
        assert_eq!(checkout.metadata.get("flow").map(String::as_str), Some("custom"));

        let address = checkout.shipping_address.unwrap();
        assert_eq!(address.line1, "Dlouha 5");
        assert_eq!(address.city, "Praha");
        assert_eq!(address.name.as_deref(), Some("Jana Novak"));
    }

    #[test]
    fn test_billing_address_fallback() {
        let event = WebhookEvent {
            event_id: "evt_2".into(),
            event_type: WebhookEventType::CheckoutCompleted,
            provider: "stripe".into(),
            data: json!({
                "id": "cs_test_456",
                "payment_status": "unpaid",
                "customer_email": "guest@example.com",
                "customer_details": {
                    "name": "Guest",
                    "address": { "line1": "Billing 1", "city": "Brno", "postal_code": "60200", "country": "CZ" }
                }
            }),
            timestamp: Utc::now(),
        };

        let checkout = completed_checkout(&event).unwrap();
        assert_eq!(checkout.payment_status, PaymentStatus::Unpaid);
        assert_eq!(checkout.customer_email.as_deref(), Some("guest@example.com"));
        assert_eq!(checkout.shipping_address.unwrap().line1, "Billing 1");
        assert!(checkout.metadata.is_empty());
    }

    #[test]
    fn test_other_event_types() {
        let payload = json!({
            "id": "evt_3",
            "type": "charge.refunded",
            "created": 1_700_000_000,
            "data": { "object": { "id": "ch_1" } }
        })
        .to_string();
        let event = parse_event(payload.as_bytes()).unwrap();
        assert_eq!(
            event.event_type,
            WebhookEventType::Unknown("charge.refunded".into())
        );
        assert!(matches!(
            completed_checkout(&event),
            Err(ShopError::WebhookParseError(_))
        ));
    }
}
