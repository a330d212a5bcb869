//! # Notifications
//!
//! Best-effort side channel for order emails. Delivery failures are logged
//! by the caller and never roll back an order.

use crate::error::ShopResult;
use crate::order::Order;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// An outgoing email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Email {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
            reply_to: None,
        }
    }

    /// Set the reply-to address
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }
}

/// Email delivery backend
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &Email) -> ShopResult<()>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Type alias for a shared notifier (dynamic dispatch)
pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes emails to the log instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: &Email) -> ShopResult<()> {
        info!(to = %email.to, subject = %email.subject, body = %email.text, "email (log only)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

fn order_body(order: &Order) -> String {
    let mut body = format!(
        "Order {}\n\n{}\n\nTotal: {}\n",
        order.id,
        order.summary,
        order.total.display()
    );
    if let Some(address) = &order.shipping_address {
        body.push_str("\nShipping to:\n");
        body.push_str(&address.formatted());
        body.push('\n');
    }
    body
}

/// Confirmation sent to the buyer
pub fn order_confirmation(order: &Order, to: &str, shop_email: Option<&str>) -> Email {
    let email = Email::new(
        to,
        "Thank you for your order",
        format!("We have received your payment.\n\n{}", order_body(order)),
    );
    match shop_email {
        Some(shop) => email.reply_to(shop),
        None => email,
    }
}

/// Copy for the shop
pub fn shop_copy(order: &Order, shop_email: &str) -> Email {
    let mut body = order_body(order);
    if let Some(customer) = &order.customer_email {
        body.push_str(&format!("\nCustomer: {}\n", customer));
    }
    body.push_str(&format!("Payment session: {}\n", order.session_id));

    let email = Email::new(shop_email, format!("New order {}", order.id), body);
    match &order.customer_email {
        Some(customer) => email.reply_to(customer.clone()),
        None => email,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{Currency, Price};
    use crate::order::{FlowKind, ShippingAddress};

    fn order() -> Order {
        Order::paid("cs_1", FlowKind::Custom, Price::from_minor(66500, Currency::EUR))
            .with_summary("Watch: Steel, Blue, Buckle")
            .with_email(Some("buyer@example.com".into()))
            .with_shipping(Some(ShippingAddress {
                line1: "Main St 1".into(),
                city: "Brno".into(),
                postal_code: "60200".into(),
                country: "CZ".into(),
                ..Default::default()
            }))
    }

    #[test]
    fn test_confirmation_contains_summary_and_total() {
        let email = order_confirmation(&order(), "buyer@example.com", Some("shop@example.com"));
        assert_eq!(email.to, "buyer@example.com");
        assert!(email.text.contains("Watch: Steel, Blue, Buckle"));
        assert!(email.text.contains("€665.00"));
        assert!(email.text.contains("60200 Brno"));
        assert_eq!(email.reply_to.as_deref(), Some("shop@example.com"));
    }

    #[test]
    fn test_shop_copy_names_customer() {
        let email = shop_copy(&order(), "shop@example.com");
        assert_eq!(email.to, "shop@example.com");
        assert!(email.text.contains("Customer: buyer@example.com"));
        assert!(email.text.contains("cs_1"));
        assert_eq!(email.reply_to.as_deref(), Some("buyer@example.com"));
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_everything() {
        let email = Email::new("a@example.com", "hi", "body");
        assert!(LogNotifier.send(&email).await.is_ok());
    }
}
