//! # forge-stripe
//!
//! Stripe payment strategy for forgecart.
//!
//! **StripeCheckoutStrategy** drives the Checkout Sessions API:
//! - Dynamic line items priced by the server
//! - Shipping address collection and a zero-cost rate when shipping is free
//! - Metadata carrying the correlation id and stock manifest
//! - Idempotency keys on session creation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use forge_stripe::StripeCheckoutStrategy;
//! use forge_core::PaymentStrategy;
//!
//! let strategy = StripeCheckoutStrategy::from_env()?;
//! let session = strategy.create_checkout(&session_request).await?;
//!
//! // Redirect the customer to session.checkout_url
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! let event = strategy.verify_webhook(payload, signature).await?;
//! if event.event_type == WebhookEventType::CheckoutCompleted {
//!     let completed = strategy.completed_checkout(&event)?;
//!     fulfillment.handle(&completed).await?;
//! }
//! ```

pub mod checkout;
pub mod config;
pub mod webhook;

// Re-exports
pub use checkout::StripeCheckoutStrategy;
pub use config::StripeConfig;
pub use webhook::{signature_header, verify_signature, REQUIRED_WEBHOOK_EVENTS};
