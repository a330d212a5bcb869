//! # Routes
//!
//! Axum router configuration for the storefront API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - POST /api/v1/checkout - Create checkout session
/// - POST /api/v1/quote - Price a configuration
/// - POST /webhook/{provider} - Payment webhook
/// - GET  /checkout/success, /checkout/cancel - Landing pages
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let checkout_routes = Router::new()
        .route("/success", get(handlers::checkout_success))
        .route("/cancel", get(handlers::checkout_cancel));

    let api_routes = Router::new()
        .route("/checkout", post(handlers::create_checkout))
        .route("/quote", post(handlers::quote));

    // Raw body route; the signature covers the exact bytes
    let webhook_path = state.strategy.webhook_path();

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/checkout", checkout_routes)
        .nest("/api/v1", api_routes)
        .route(&webhook_path, post(handlers::payment_webhook))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
