//! # Webhook Notifier
//!
//! Forwards each email as JSON to a mail-relay endpoint.

use async_trait::async_trait;
use forge_core::{Email, Notifier, ShopError, ShopResult};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> ShopResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ShopError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, email: &Email) -> ShopResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(email)
            .send()
            .await
            .map_err(|e| ShopError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShopError::Notification(format!("HTTP {}: {}", status, body)));
        }

        debug!(to = %email.to, "email forwarded");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
