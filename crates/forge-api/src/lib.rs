//! # forge-api
//!
//! HTTP API layer for forgecart.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Checkout and quote endpoints over the forge-core pipeline
//! - The payment webhook driving fulfillment
//! - HTTP exchange-rate source and email relay
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/api/v1/checkout` | Create checkout session (`custom`, `built` or `cart`) |
//! | POST | `/api/v1/quote` | Price a configuration |
//! | POST | `/webhook/stripe` | Stripe webhook |
//! | GET | `/checkout/success` | Post-payment landing page |
//! | GET | `/checkout/cancel` | Cancelled payment page |

pub mod fx;
pub mod handlers;
pub mod notify;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState, LogFormat};
