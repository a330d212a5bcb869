//! # Order Types
//!
//! Payment-session line items, checkout sessions, provider webhook events and
//! the orders created once a payment is confirmed.

use crate::error::{ShopError, ShopResult};
use crate::money::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// A line of a payment session, priced in the session currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Display name
    pub name: String,

    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Unit amount in smallest currency unit
    pub unit_amount: i64,

    /// Quantity
    pub quantity: u32,

    /// Optional image URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl LineItem {
    pub fn new(name: impl Into<String>, unit_amount: i64, quantity: u32) -> Self {
        Self {
            name: name.into(),
            description: None,
            unit_amount,
            quantity,
            image_url: None,
        }
    }

    /// Builder: set description (blank descriptions are dropped)
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.trim().is_empty()).then_some(description);
        self
    }

    /// Builder: set image
    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }

    /// Total for this line in smallest currency unit
    pub fn total(&self) -> ShopResult<i64> {
        line_total(self.unit_amount, self.quantity)
    }
}

/// `unit * quantity`, rejected when it does not fit in an `i64`
pub(crate) fn line_total(unit: i64, quantity: u32) -> ShopResult<i64> {
    unit.checked_mul(i64::from(quantity)).ok_or_else(|| {
        ShopError::InvalidRequest(format!("line amount out of range: {} x {}", unit, quantity))
    })
}

/// Sum of line totals, rejected on overflow
pub(crate) fn sum_amounts(amounts: impl IntoIterator<Item = ShopResult<i64>>) -> ShopResult<i64> {
    amounts.into_iter().try_fold(0i64, |acc, amount| {
        acc.checked_add(amount?)
            .ok_or_else(|| ShopError::InvalidRequest("order amount out of range".to_string()))
    })
}

/// Which checkout flow produced a payment session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Configured build
    Custom,
    /// Single ready-made product
    Built,
    /// Mixed cart
    Cart,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Custom => "custom",
            FlowKind::Built => "built",
            FlowKind::Cart => "cart",
        }
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom" => Ok(FlowKind::Custom),
            "built" => Ok(FlowKind::Built),
            "cart" => Ok(FlowKind::Cart),
            other => Err(format!("unknown checkout flow: {}", other)),
        }
    }
}

/// A checkout session created by a payment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider's session ID
    pub session_id: String,

    /// Configuration id (custom/built) or cart correlation id
    pub correlation_id: String,

    /// Provider name (e.g., "stripe")
    pub provider: String,

    /// URL to redirect customer to for payment
    pub checkout_url: String,

    /// When the session expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Create a new checkout session
    pub fn new(
        session_id: impl Into<String>,
        correlation_id: impl Into<String>,
        provider: impl Into<String>,
        checkout_url: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            correlation_id: correlation_id.into(),
            provider: provider.into(),
            checkout_url: checkout_url.into(),
            expires_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Webhook event types we care about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// Checkout session completed
    CheckoutCompleted,
    /// Checkout session expired without payment
    CheckoutExpired,
    /// Unknown event (passthrough)
    Unknown(String),
}

/// A verified webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event ID from provider
    pub event_id: String,

    /// Event type
    pub event_type: WebhookEventType,

    /// Provider name
    pub provider: String,

    /// Event object (the session for checkout events)
    pub data: serde_json::Value,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// Payment status reported with a completed checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl PaymentStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "paid" => PaymentStatus::Paid,
            "no_payment_required" => PaymentStatus::NoPaymentRequired,
            _ => PaymentStatus::Unpaid,
        }
    }
}

/// Shipping address captured by the payment provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub country: String,
}

impl ShippingAddress {
    /// Multi-line postal form
    pub fn formatted(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(name) = &self.name {
            parts.push(name.clone());
        }
        parts.push(self.line1.clone());
        if let Some(line2) = self.line2.as_ref().filter(|l| !l.is_empty()) {
            parts.push(line2.clone());
        }
        parts.push(format!("{} {}", self.postal_code, self.city).trim().to_string());
        if let Some(state) = self.state.as_ref().filter(|s| !s.is_empty()) {
            parts.push(state.clone());
        }
        parts.push(self.country.clone());
        parts.retain(|p| !p.is_empty());
        parts.join("\n")
    }
}

/// Order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Paid,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paid" => Ok(OrderStatus::Paid),
            "shipped" => Ok(OrderStatus::Shipped),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// A confirmed purchase. One per completed payment session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID (generated)
    pub id: String,

    /// Provider session id; unique across orders
    pub session_id: String,

    pub status: OrderStatus,

    /// Amount charged, in the session currency
    pub total: Price,

    pub summary: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<ShippingAddress>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Configuration record this order settles (custom/built flows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_id: Option<String>,

    pub flow: FlowKind,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a paid order for a provider session
    pub fn paid(session_id: impl Into<String>, flow: FlowKind, total: Price) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            status: OrderStatus::Paid,
            total,
            summary: String::new(),
            shipping_address: None,
            customer_email: None,
            user_id: None,
            configuration_id: None,
            flow,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set summary
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Builder: set customer email
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.customer_email = email;
        self
    }

    /// Builder: set shipping address
    pub fn with_shipping(mut self, address: Option<ShippingAddress>) -> Self {
        self.shipping_address = address;
        self
    }

    /// Builder: set user
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Builder: set configuration reference
    pub fn with_configuration(mut self, configuration_id: Option<String>) -> Self {
        self.configuration_id = configuration_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    #[test]
    fn test_line_item_total() {
        let item = LineItem::new("Desk lamp", 4500, 3).with_description("  ");
        assert_eq!(item.total().unwrap(), 13500);
        assert!(item.description.is_none());
    }

    #[test]
    fn test_line_totals_reject_overflow() {
        let item = LineItem::new("Desk lamp", i64::MAX / 2 + 1, 2);
        assert!(matches!(item.total(), Err(ShopError::InvalidRequest(_))));

        let half = LineItem::new("Desk lamp", i64::MAX / 2 + 1, 1);
        assert!(sum_amounts([half.total(), half.total()]).is_err());
        assert_eq!(sum_amounts([Ok(4500), Ok(500)]).unwrap(), 5000);
    }

    #[test]
    fn test_flow_kind_round_trip() {
        for flow in [FlowKind::Custom, FlowKind::Built, FlowKind::Cart] {
            assert_eq!(flow.as_str().parse::<FlowKind>(), Ok(flow));
        }
        assert!("subscription".parse::<FlowKind>().is_err());
    }

    #[test]
    fn test_payment_status_parse() {
        assert_eq!(PaymentStatus::parse("paid"), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::parse("unpaid"), PaymentStatus::Unpaid);
        assert_eq!(PaymentStatus::parse("no_payment_required"), PaymentStatus::NoPaymentRequired);
    }

    #[test]
    fn test_shipping_address_formatted() {
        let address = ShippingAddress {
            name: Some("Jana Nováková".into()),
            line1: "Vinohradská 12".into(),
            line2: None,
            city: "Praha".into(),
            postal_code: "120 00".into(),
            state: None,
            country: "CZ".into(),
        };
        assert_eq!(address.formatted(), "Jana Nováková\nVinohradská 12\n120 00 Praha\nCZ");
    }

    #[test]
    fn test_paid_order() {
        let order = Order::paid("cs_1", FlowKind::Cart, Price::from_minor(4500, Currency::EUR))
            .with_email(Some("a@example.com".into()));
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.total.amount, 4500);
        assert_eq!(order.customer_email.as_deref(), Some("a@example.com"));
    }
}
