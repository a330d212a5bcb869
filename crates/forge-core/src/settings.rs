//! # Site Settings
//!
//! Site-wide settings are stored as key/value rows. They are read once per
//! request into a [`SettingsSnapshot`] that is passed explicitly to the
//! calculator, aggregator and session builder.

use crate::money::Currency;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

pub const GLOBAL_DISCOUNT_KEY: &str = "global_discount_percent";
pub const CONFIGURATOR_FREE_SHIPPING_KEY: &str = "configurator_free_shipping";
/// Prefix for per-currency rate overrides, e.g. `exchange_rate.usd`
pub const EXCHANGE_RATE_PREFIX: &str = "exchange_rate.";

/// Raw settings row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
}

impl SettingRow {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Immutable view of the settings table taken at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    /// Monotonic version of the settings table this snapshot was read from
    pub version: u64,
    /// Discount applied to configurator totals, clamped to [0, 100]
    pub global_discount_percent: f64,
    /// Whether configured (custom) builds ship for free
    pub configurator_free_shipping: bool,
    /// Units of currency per one unit of base currency
    pub exchange_rate_overrides: HashMap<Currency, f64>,
}

impl SettingsSnapshot {
    /// Parse settings rows. Unknown keys are ignored; malformed values are
    /// logged and left at their defaults.
    pub fn from_rows(version: u64, rows: &[SettingRow]) -> Self {
        let mut snapshot = SettingsSnapshot {
            version,
            ..Default::default()
        };

        for row in rows {
            let value = row.value.trim();
            match row.key.as_str() {
                GLOBAL_DISCOUNT_KEY => match value.parse::<f64>() {
                    Ok(pct) if pct.is_finite() => {
                        snapshot.global_discount_percent = pct.clamp(0.0, 100.0)
                    }
                    _ => warn!(key = %row.key, value, "ignoring malformed discount setting"),
                },
                CONFIGURATOR_FREE_SHIPPING_KEY => {
                    snapshot.configurator_free_shipping =
                        matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
                }
                key if key.starts_with(EXCHANGE_RATE_PREFIX) => {
                    let code = &key[EXCHANGE_RATE_PREFIX.len()..];
                    match (code.parse::<Currency>(), value.parse::<f64>()) {
                        (Ok(currency), Ok(rate)) if rate.is_finite() && rate > 0.0 => {
                            snapshot.exchange_rate_overrides.insert(currency, rate);
                        }
                        _ => warn!(
                            key = %row.key,
                            value,
                            "ignoring malformed exchange rate override"
                        ),
                    }
                }
                _ => {}
            }
        }

        snapshot
    }

    /// Builder: set global discount
    pub fn with_global_discount(mut self, percent: f64) -> Self {
        self.global_discount_percent = percent.clamp(0.0, 100.0);
        self
    }

    /// Builder: toggle configurator free shipping
    pub fn with_configurator_free_shipping(mut self, enabled: bool) -> Self {
        self.configurator_free_shipping = enabled;
        self
    }
}
