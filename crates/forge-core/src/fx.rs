//! # Exchange Rates
//!
//! Converts base-currency amounts into the customer's display currency.
//! Precedence: a rate pinned in site settings, then a cached rate from the
//! live source (refreshed after the TTL), then a fixed approximate table.

use crate::error::{ShopError, ShopResult};
use crate::money::{Currency, Price};
use crate::settings::SettingsSnapshot;
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default refresh interval for live rates (6 hours)
pub const DEFAULT_RATE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Live exchange-rate lookup
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of `target` per one unit of `base`
    async fn fetch_rate(&self, base: Currency, target: Currency) -> ShopResult<f64>;
}

/// How a rate was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    Identity,
    Override,
    Live,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub rate: f64,
    pub origin: RateOrigin,
}

/// Approximate rate derived from the built-in USD table
pub fn fallback_rate(base: Currency, target: Currency) -> f64 {
    base.approximate_usd_value() / target.approximate_usd_value()
}

/// Rate cache in front of an optional live source
pub struct ExchangeRates {
    base: Currency,
    source: Option<Arc<dyn RateSource>>,
    cache: Cache<Currency, f64>,
}

impl ExchangeRates {
    pub fn new(base: Currency, source: Arc<dyn RateSource>, ttl: Duration) -> Self {
        Self {
            base,
            source: Some(source),
            cache: Cache::builder()
                .max_capacity(Currency::ALL.len() as u64)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Settings overrides and the fallback table only
    pub fn offline(base: Currency) -> Self {
        Self {
            base,
            source: None,
            cache: Cache::new(Currency::ALL.len() as u64),
        }
    }

    pub fn base(&self) -> Currency {
        self.base
    }

    pub async fn rate(&self, target: Currency, settings: &SettingsSnapshot) -> RateQuote {
        if target == self.base {
            return RateQuote {
                rate: 1.0,
                origin: RateOrigin::Identity,
            };
        }
        if let Some(rate) = settings.exchange_rate_overrides.get(&target) {
            return RateQuote {
                rate: *rate,
                origin: RateOrigin::Override,
            };
        }

        if let Some(source) = &self.source {
            let base = self.base;
            let fetched = self
                .cache
                .try_get_with(target, async move {
                    let rate = source.fetch_rate(base, target).await?;
                    if rate.is_finite() && rate > 0.0 {
                        debug!(%base, %target, rate, "fetched exchange rate");
                        Ok(rate)
                    } else {
                        Err(ShopError::ProviderError {
                            provider: "fx".to_string(),
                            message: format!("invalid rate {} for {}", rate, target),
                        })
                    }
                })
                .await;
            match fetched {
                Ok(rate) => {
                    return RateQuote {
                        rate,
                        origin: RateOrigin::Live,
                    }
                }
                Err(err) => {
                    warn!(%target, error = %err, "exchange rate lookup failed, using fallback")
                }
            }
        }

        RateQuote {
            rate: fallback_rate(self.base, target),
            origin: RateOrigin::Fallback,
        }
    }

    /// Convert a base-currency amount, rounded to the target's smallest unit
    pub async fn convert(
        &self,
        amount: i64,
        target: Currency,
        settings: &SettingsSnapshot,
    ) -> (Price, RateQuote) {
        let quote = self.rate(target, settings).await;
        let price = Price::from_minor(amount, self.base).convert(target, quote.rate);
        (price, quote)
    }
}
