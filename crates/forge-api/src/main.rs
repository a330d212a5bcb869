//! # forgecart
//!
//! Storefront checkout and fulfillment service.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_PUBLISHABLE_KEY=pk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//! export DATABASE_URL=postgres://...   # optional, in-memory catalog otherwise
//!
//! # Run the server
//! forgecart
//! ```

use forge_api::{routes, AppState, LogFormat};
use forge_stripe::REQUIRED_WEBHOOK_EVENTS;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    print_banner();

    let state = AppState::from_env().await?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!(environment = %state.config.environment, "starting");
    info!(
        base_currency = %state.config.base_currency,
        price_policy = ?state.config.price_policy,
        postgres = state.config.database_url.is_some(),
        "pipeline configured"
    );

    let webhook_path = state.strategy.webhook_path();
    let app = routes::create_router(state);

    info!("forgecart listening on http://{}", addr);

    if !is_prod {
        info!("Checkout: POST http://{}/api/v1/checkout", addr);
        info!("Quote:    POST http://{}/api/v1/quote", addr);
        info!(
            events = ?REQUIRED_WEBHOOK_EVENTS,
            "Webhook:  POST http://{}{}", addr, webhook_path
        );
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `RUST_LOG` filters; `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let json = matches!(
        std::env::var("LOG_FORMAT").ok().as_deref(),
        Some("json")
    );
    let format = if json { LogFormat::Json } else { LogFormat::Text };

    tracing_subscriber::registry()
        .with((format == LogFormat::Text).then(|| fmt::layer()))
        .with((format == LogFormat::Json).then(|| fmt::layer().json()))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

fn print_banner() {
    println!(
        r#"
  forgecart
  ━━━━━━━━━━━━━━━━━━━━━━━
  Configure, price, fulfill
  Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
