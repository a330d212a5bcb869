//! # HTTP Exchange-Rate Source
//!
//! `GET {FX_API_URL}?from=EUR&to=USD` answering `{"rates": {"USD": 1.0837}}`.

use async_trait::async_trait;
use forge_core::{Currency, RateSource, ShopError, ShopResult};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

pub struct HttpRateSource {
    client: Client,
    url: String,
}

impl HttpRateSource {
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

    fn provider_error(message: impl Into<String>) -> ShopError {
        ShopError::ProviderError {
            provider: "fx".to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    #[instrument(skip(self))]
    async fn fetch_rate(&self, base: Currency, target: Currency) -> ShopResult<f64> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("from", base.to_string()), ("to", target.to_string())])
            .send()
            .await
            .map_err(|e| ShopError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::provider_error(format!("HTTP {}", status)));
        }

        let body: RatesResponse = response
            .json()
            .await
            .map_err(|e| Self::provider_error(format!("invalid rates body: {}", e)))?;

        body.rates
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(target.as_str()))
            .map(|(_, rate)| *rate)
            .ok_or_else(|| Self::provider_error(format!("no rate for {}", target)))
    }
}
