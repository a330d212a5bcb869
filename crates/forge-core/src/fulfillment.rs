//! # Fulfillment Webhook Handler
//!
//! Consumes a verified "checkout completed" confirmation and turns it into
//! exactly one order. Deliveries are at-least-once:
//!
//! ```text
//! received ─▶ paid-confirmed ─▶ (idempotency check) ─▶ order-created ─▶ done
//!                  │                    │                    │
//!              not paid             duplicate          notification
//!             (ignored)              (no-op)           (best effort)
//! ```
//!
//! Stock decrements, configuration status and cart clearing run before the
//! order insert. Any failure there returns an error so the processor
//! redelivers; the stock ledger and the unique session id make the retry
//! safe. Nothing after the insert can fail the delivery.

use crate::checkout::SessionMetadata;
use crate::error::ShopResult;
use crate::money::{Currency, Price};
use crate::notify::{order_confirmation, shop_copy, Email, SharedNotifier};
use crate::order::{FlowKind, Order, PaymentStatus, ShippingAddress};
use crate::store::{InsertOutcome, SharedStore, StockChange, StockMovement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument, warn};

/// Provider-neutral view of a completed checkout session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedCheckout {
    pub session_id: String,
    pub payment_status: PaymentStatus,
    /// Amount charged in smallest unit of `currency`
    pub amount_total: Option<i64>,
    pub currency: Option<Currency>,
    pub customer_email: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub metadata: BTreeMap<String, String>,
}

/// Progress of one delivery, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentStage {
    Received,
    PaidConfirmed,
    OrderCreated,
    Done,
}

/// What a delivery did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    /// Not paid; acknowledged without side effects
    Ignored { reason: String },
    /// An order for this session already exists
    Duplicate,
    Fulfilled { order_id: String, notified: bool },
}

pub struct FulfillmentHandler {
    store: SharedStore,
    notifier: SharedNotifier,
    shop_email: Option<String>,
    base_currency: Currency,
}

impl FulfillmentHandler {
    pub fn new(store: SharedStore, notifier: SharedNotifier, base_currency: Currency) -> Self {
        Self {
            store,
            notifier,
            shop_email: None,
            base_currency,
        }
    }

    /// Builder: address that receives a copy of every order
    pub fn with_shop_email(mut self, shop_email: Option<String>) -> Self {
        self.shop_email = shop_email;
        self
    }

    #[instrument(skip_all, fields(session_id = %checkout.session_id))]
    pub async fn handle(&self, checkout: &CompletedCheckout) -> ShopResult<FulfillmentOutcome> {
        debug!(stage = ?FulfillmentStage::Received, "fulfillment started");

        if !matches!(
            checkout.payment_status,
            PaymentStatus::Paid | PaymentStatus::NoPaymentRequired
        ) {
            info!(status = ?checkout.payment_status, "checkout not paid, ignoring");
            return Ok(FulfillmentOutcome::Ignored {
                reason: format!("payment status {:?}", checkout.payment_status),
            });
        }
        debug!(stage = ?FulfillmentStage::PaidConfirmed, "payment confirmed");

        if self.store.order_by_session(&checkout.session_id).await?.is_some() {
            info!("order already exists for session, duplicate delivery");
            return Ok(FulfillmentOutcome::Duplicate);
        }

        let metadata = SessionMetadata::from_map(&checkout.metadata)?;
        let configuration_id = match metadata.flow {
            FlowKind::Custom | FlowKind::Built => {
                self.settle_configuration(&metadata.correlation_id).await?;
                Some(metadata.correlation_id.clone())
            }
            FlowKind::Cart => None,
        };
        match metadata.flow {
            FlowKind::Custom => {}
            FlowKind::Built => match &metadata.product_id {
                Some(product_id) => self.decrement(&checkout.session_id, product_id, 1).await?,
                None => warn!(
                    correlation_id = %metadata.correlation_id,
                    "built checkout without product id"
                ),
            },
            FlowKind::Cart => {
                for (product_id, quantity) in &metadata.manifest.0 {
                    self.decrement(&checkout.session_id, product_id, *quantity).await?;
                }
                if let Some(user_id) = &metadata.user_id {
                    let removed = self.store.clear_cart(user_id).await?;
                    debug!(%user_id, removed, "cart cleared");
                }
            }
        }

        let total = Price::from_minor(
            checkout.amount_total.unwrap_or_default(),
            checkout.currency.unwrap_or(self.base_currency),
        );
        let order = Order::paid(&checkout.session_id, metadata.flow, total)
            .with_summary(metadata.summary.clone())
            .with_email(checkout.customer_email.clone())
            .with_shipping(checkout.shipping_address.clone())
            .with_user(metadata.user_id.clone())
            .with_configuration(configuration_id);

        if self.store.insert_order(&order).await? == InsertOutcome::Duplicate {
            info!("concurrent delivery created the order first");
            return Ok(FulfillmentOutcome::Duplicate);
        }
        info!(
            stage = ?FulfillmentStage::OrderCreated,
            order_id = %order.id,
            flow = %order.flow,
            total = order.total.amount,
            "order created"
        );

        let notified = self.notify(&order).await;
        debug!(stage = ?FulfillmentStage::Done, notified, "fulfillment finished");

        Ok(FulfillmentOutcome::Fulfilled {
            order_id: order.id,
            notified,
        })
    }

    async fn settle_configuration(&self, configuration_id: &str) -> ShopResult<()> {
        if !self.store.mark_configuration_paid(configuration_id).await? {
            warn!(%configuration_id, "no pending configuration for paid session");
        }
        Ok(())
    }

    async fn decrement(&self, session_id: &str, product_id: &str, quantity: u32) -> ShopResult<()> {
        let movement = StockMovement::new(session_id, product_id, quantity);
        match self.store.decrement_stock(&movement).await? {
            StockChange::Applied { remaining } => {
                debug!(%product_id, quantity, remaining, "stock decremented")
            }
            StockChange::AlreadyApplied => debug!(%product_id, "stock movement already applied"),
            StockChange::Depleted => {
                warn!(%product_id, quantity, "paid for product with no stock left")
            }
            StockChange::NotFound => warn!(%product_id, "paid for unknown product"),
        }
        Ok(())
    }

    /// Send confirmations; returns whether at least one was delivered
    async fn notify(&self, order: &Order) -> bool {
        let mut emails: Vec<Email> = Vec::new();
        if let Some(customer) = &order.customer_email {
            emails.push(order_confirmation(order, customer, self.shop_email.as_deref()));
        }
        if let Some(shop) = &self.shop_email {
            emails.push(shop_copy(order, shop));
        }

        let mut delivered = false;
        for email in &emails {
            match self.notifier.send(email).await {
                Ok(()) => delivered = true,
                Err(err) => error!(
                    notifier = self.notifier.name(),
                    to = %email.to,
                    error = %err,
                    "failed to send order email"
                ),
            }
        }
        delivered
    }
}
