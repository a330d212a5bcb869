//! # Price Calculator
//!
//! Pure arithmetic over resolved line items: per-item discounts, then the
//! site-wide discount on the sum. Amounts are smallest units of the base
//! currency; rounding happens once, on the final total.

use crate::resolver::ResolvedLine;
use crate::settings::SettingsSnapshot;
use serde::{Deserialize, Serialize};

/// Clamp a discount percent to [0, 100]; NaN counts as no discount.
pub fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// `price * (1 - discount/100)` with negative prices treated as zero
pub fn effective_price(price: i64, discount_percent: f64) -> f64 {
    price.max(0) as f64 * (1.0 - clamp_percent(discount_percent) / 100.0)
}

/// Result of pricing one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Sum of list prices before any discount
    pub list_total: i64,
    /// Sum of effective prices before the global discount, rounded
    pub subtotal: i64,
    pub global_discount_percent: f64,
    /// Amount to charge
    pub total: i64,
}

impl PriceBreakdown {
    pub fn savings(&self) -> i64 {
        (self.list_total - self.total).max(0)
    }
}

/// Applies item and site-wide discounts
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceCalculator {
    global_discount_percent: f64,
}

impl PriceCalculator {
    pub fn new(global_discount_percent: f64) -> Self {
        Self {
            global_discount_percent: clamp_percent(global_discount_percent),
        }
    }

    pub fn from_settings(settings: &SettingsSnapshot) -> Self {
        Self::new(settings.global_discount_percent)
    }

    pub fn price(&self, lines: &[ResolvedLine]) -> PriceBreakdown {
        let list_total = lines.iter().map(|l| l.unit_price.max(0)).sum();
        let discounted: f64 = lines
            .iter()
            .map(|l| effective_price(l.unit_price, l.discount_percent))
            .sum();
        let total = discounted * (1.0 - self.global_discount_percent / 100.0);

        PriceBreakdown {
            list_total,
            subtotal: discounted.round() as i64,
            global_discount_percent: self.global_discount_percent,
            total: (total.round() as i64).max(0),
        }
    }
}
