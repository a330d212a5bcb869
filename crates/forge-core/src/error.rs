//! # Shop Error Types
//!
//! Typed error handling for the forgecart pricing and fulfillment pipeline.
//! All pipeline operations return `Result<T, ShopError>`.

use std::fmt;
use thiserror::Error;

/// Why a cart item cannot be sold right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Product id does not exist in the catalog
    NotFound,
    /// Product exists but is not active
    Inactive,
    /// Requested quantity exceeds current stock
    InsufficientStock { requested: u32, available: u32 },
    /// Custom item whose configuration no longer resolves to a price
    Unpriceable,
    /// Custom item without an embedded configuration snapshot
    MissingConfiguration,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::NotFound => write!(f, "not found"),
            UnavailableReason::Inactive => write!(f, "no longer available"),
            UnavailableReason::InsufficientStock {
                requested,
                available,
            } => write!(f, "only {} in stock, {} requested", available, requested),
            UnavailableReason::Unpriceable => write!(f, "configuration cannot be priced"),
            UnavailableReason::MissingConfiguration => write!(f, "configuration missing"),
        }
    }
}

/// Core error type for the storefront pipeline
#[derive(Debug, Error)]
pub enum ShopError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed or incomplete request payload
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Function option unknown or without mapped steps
    #[error("Unresolvable configuration for function option {function_option_id}")]
    UnresolvableConfiguration { function_option_id: String },

    /// Product not found in catalog
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: String },

    /// A cart item blocks the whole checkout
    #[error("Cart item '{item}' is unavailable: {reason}")]
    CartUnavailable {
        item_id: String,
        item: String,
        reason: UnavailableReason,
    },

    /// Total below the processor's minimum charge
    #[error("Order total {amount} {currency} is below the minimum of {minimum}")]
    BelowMinimumOrderAmount {
        amount: i64,
        minimum: i64,
        currency: String,
    },

    /// Payment provider API error
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Network/HTTP error communicating with provider
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Webhook signature verification failed
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Store read or write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Rate limited by provider
    #[error("Rate limited by {provider}, retry after {retry_after_secs} seconds")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    /// Notification delivery failed (never escalated past fulfillment)
    #[error("Notification error: {0}")]
    Notification(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse error taxonomy used for responses and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Availability,
    Pricing,
    Integrity,
    Persistence,
    Provider,
    BestEffort,
    Internal,
}

impl ShopError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShopError::InvalidRequest(_)
            | ShopError::UnresolvableConfiguration { .. }
            | ShopError::WebhookParseError(_) => ErrorCategory::Validation,
            ShopError::ProductNotFound { .. } | ShopError::CartUnavailable { .. } => {
                ErrorCategory::Availability
            }
            ShopError::BelowMinimumOrderAmount { .. } => ErrorCategory::Pricing,
            ShopError::InvalidSignature(_) => ErrorCategory::Integrity,
            ShopError::Persistence(_) => ErrorCategory::Persistence,
            ShopError::ProviderError { .. }
            | ShopError::NetworkError(_)
            | ShopError::RateLimited { .. } => ErrorCategory::Provider,
            ShopError::Notification(_) => ErrorCategory::BestEffort,
            ShopError::Configuration(_)
            | ShopError::Internal(_)
            | ShopError::Serialization(_) => ErrorCategory::Internal,
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Persistence | ErrorCategory::Provider
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ShopError::Configuration(_) => 500,
            ShopError::InvalidRequest(_) => 400,
            ShopError::UnresolvableConfiguration { .. } => 422,
            ShopError::ProductNotFound { .. } => 404,
            ShopError::CartUnavailable { .. } => 409,
            ShopError::BelowMinimumOrderAmount { .. } => 422,
            ShopError::ProviderError { .. } => 502,
            ShopError::NetworkError(_) => 503,
            ShopError::InvalidSignature(_) => 400,
            ShopError::WebhookParseError(_) => 400,
            ShopError::Persistence(_) => 503,
            ShopError::RateLimited { .. } => 429,
            ShopError::Notification(_) => 500,
            ShopError::Internal(_) => 500,
            ShopError::Serialization(_) => 500,
        }
    }

    /// Generic customer-facing message for the given locale.
    ///
    /// Internal details never leave the server; only availability errors
    /// name the offending item.
    pub fn user_message(&self, locale: &str) -> String {
        let czech = locale.to_ascii_lowercase().starts_with("cs");
        match (self.category(), czech) {
            (ErrorCategory::Availability, false) => match self {
                ShopError::CartUnavailable { item, .. } => {
                    format!("\"{}\" is no longer available in the requested quantity.", item)
                }
                _ => "The selected product is no longer available.".to_string(),
            },
            (ErrorCategory::Availability, true) => match self {
                ShopError::CartUnavailable { item, .. } => {
                    format!("Položka \"{}\" již není dostupná v požadovaném množství.", item)
                }
                _ => "Vybraný produkt již není dostupný.".to_string(),
            },
            (ErrorCategory::Pricing, false) => {
                "The order total is below the minimum amount we can charge.".to_string()
            }
            (ErrorCategory::Pricing, true) => {
                "Celková částka objednávky je nižší než minimální platba.".to_string()
            }
            (ErrorCategory::Validation, false) => {
                "Your order could not be processed. Please review your selection.".to_string()
            }
            (ErrorCategory::Validation, true) => {
                "Objednávku nelze zpracovat. Zkontrolujte prosím svůj výběr.".to_string()
            }
            (_, false) => "Something went wrong. Please try again later.".to_string(),
            (_, true) => "Něco se pokazilo. Zkuste to prosím později.".to_string(),
        }
    }
}

impl From<serde_json::Error> for ShopError {
    fn from(err: serde_json::Error) -> Self {
        ShopError::Serialization(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type ShopResult<T> = Result<T, ShopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(ShopError::NetworkError("timeout".into()).is_retryable());
        assert!(ShopError::Persistence("connection reset".into()).is_retryable());
        assert!(!ShopError::InvalidSignature("mismatch".into()).is_retryable());
        assert!(!ShopError::InvalidRequest("bad data".into()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ShopError::InvalidRequest("test".into()).status_code(), 400);
        assert_eq!(
            ShopError::CartUnavailable {
                item_id: "p1".into(),
                item: "Steel case".into(),
                reason: UnavailableReason::Inactive,
            }
            .status_code(),
            409
        );
        assert_eq!(
            ShopError::BelowMinimumOrderAmount {
                amount: 10,
                minimum: 50,
                currency: "usd".into(),
            }
            .status_code(),
            422
        );
    }

    #[test]
    fn test_user_message_names_item_but_hides_internals() {
        let err = ShopError::CartUnavailable {
            item_id: "p1".into(),
            item: "Steel case".into(),
            reason: UnavailableReason::InsufficientStock {
                requested: 2,
                available: 0,
            },
        };
        assert!(err.user_message("en").contains("Steel case"));

        let err = ShopError::Persistence("relation \"orders\" does not exist".into());
        assert!(!err.user_message("en").contains("orders"));
        assert!(err.user_message("cs-CZ").starts_with("Něco"));
    }
}
