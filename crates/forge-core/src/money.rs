//! # Money Types
//!
//! Currencies and prices for forgecart. Every stored amount is an integer in
//! the smallest unit of the shop's base currency.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    JPY,
    CAD,
    AUD,
    CHF,
    MXN,
    CZK,
    PLN,
    SEK,
}

impl Currency {
    pub const ALL: [Currency; 11] = [
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::JPY,
        Currency::CAD,
        Currency::AUD,
        Currency::CHF,
        Currency::MXN,
        Currency::CZK,
        Currency::PLN,
        Currency::SEK,
    ];

    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::GBP => "gbp",
            Currency::JPY => "jpy",
            Currency::CAD => "cad",
            Currency::AUD => "aud",
            Currency::CHF => "chf",
            Currency::MXN => "mxn",
            Currency::CZK => "czk",
            Currency::PLN => "pln",
            Currency::SEK => "sek",
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, most others have 2)
    pub fn decimal_places(&self) -> u8 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Convert a decimal amount to the smallest currency unit (cents, etc.)
    pub fn to_smallest_unit(&self, amount: f64) -> i64 {
        let multiplier = 10_f64.powi(self.decimal_places() as i32);
        (amount * multiplier).round() as i64
    }

    /// Convert from smallest unit back to decimal
    pub fn from_smallest_unit(&self, amount: i64) -> f64 {
        let divisor = 10_f64.powi(self.decimal_places() as i32);
        amount as f64 / divisor
    }

    /// Minimum chargeable amount enforced by the payment processor,
    /// in the smallest unit of this currency.
    pub fn minimum_charge(&self) -> i64 {
        match self {
            Currency::USD
            | Currency::EUR
            | Currency::CAD
            | Currency::AUD
            | Currency::CHF
            | Currency::JPY => 50,
            Currency::GBP => 30,
            Currency::MXN => 1000,
            Currency::CZK => 1500,
            Currency::PLN => 200,
            Currency::SEK => 300,
        }
    }

    /// Rough value of one unit in USD, used only when no live or
    /// configured exchange rate is available.
    pub fn approximate_usd_value(&self) -> f64 {
        match self {
            Currency::USD => 1.0,
            Currency::EUR => 1.08,
            Currency::GBP => 1.27,
            Currency::JPY => 0.0067,
            Currency::CAD => 0.74,
            Currency::AUD => 0.66,
            Currency::CHF => 1.13,
            Currency::MXN => 0.058,
            Currency::CZK => 0.043,
            Currency::PLN => 0.25,
            Currency::SEK => 0.095,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::JPY => "¥",
            Currency::CAD => "C$",
            Currency::AUD => "A$",
            Currency::CHF => "CHF ",
            Currency::MXN => "MX$",
            Currency::CZK => "Kč ",
            Currency::PLN => "zł ",
            Currency::SEK => "kr ",
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::EUR
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Currency::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| format!("unsupported currency: {}", s))
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit (cents for USD)
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a new price from decimal amount
    pub fn new(amount: f64, currency: Currency) -> Self {
        Self {
            amount: currency.to_smallest_unit(amount),
            currency,
        }
    }

    /// Create a price from smallest unit (cents)
    pub fn from_minor(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Get the decimal amount
    pub fn as_decimal(&self) -> f64 {
        self.currency.from_smallest_unit(self.amount)
    }

    /// Convert into another currency at `rate` (units of target per unit of
    /// self), rounded to the target's smallest unit.
    pub fn convert(&self, target: Currency, rate: f64) -> Price {
        if target == self.currency {
            return *self;
        }
        Price::new(self.as_decimal() * rate, target)
    }

    /// Format for display (e.g., "$10.00")
    pub fn display(&self) -> String {
        let symbol = self.currency.symbol();
        if self.currency.decimal_places() == 0 {
            format!("{}{}", symbol, self.amount)
        } else {
            format!("{}{:.2}", symbol, self.as_decimal())
        }
    }
}
