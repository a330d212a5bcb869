//! Row decoding for the forgecart tables.

use chrono::{DateTime, Utc};
use forge_core::{
    Addon, CartItem, Configuration, ConfigurationRecord, ConfigurationStatus, Currency, FlowKind,
    FunctionOption, FunctionStep, LocalizedText, Order, OrderStatus, Price, Product,
    ShippingAddress, ShopError, ShopResult, Step, StepOption,
};
use std::str::FromStr;
use tokio_postgres::types::{FromSql, Json};
use tokio_postgres::Row;

pub(crate) fn persistence(context: &str, err: impl std::fmt::Display) -> ShopError {
    ShopError::Persistence(format!("{}: {}", context, err))
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> ShopResult<T> {
    row.try_get(name)
        .map_err(|e| persistence(&format!("column {}", name), e))
}

fn labels(row: &Row) -> ShopResult<LocalizedText> {
    Ok(col::<Json<LocalizedText>>(row, "labels")?.0)
}

fn count(row: &Row, name: &str) -> ShopResult<u32> {
    Ok(col::<i32>(row, name)?.max(0) as u32)
}

fn parsed<T: FromStr<Err = String>>(row: &Row, name: &str) -> ShopResult<T> {
    let raw: String = col(row, name)?;
    raw.parse().map_err(|e| persistence(&format!("column {}", name), e))
}

pub(crate) fn function_option(row: &Row) -> ShopResult<FunctionOption> {
    Ok(FunctionOption {
        id: col(row, "id")?,
        labels: labels(row)?,
        price: col(row, "price")?,
        discount_percent: col(row, "discount_percent")?,
    })
}

pub(crate) fn step(row: &Row) -> ShopResult<Step> {
    Ok(Step {
        id: col(row, "id")?,
        step_key: col(row, "step_key")?,
        labels: labels(row)?,
        optional: col(row, "optional")?,
        sort_order: col(row, "sort_order")?,
    })
}

pub(crate) fn function_step(row: &Row) -> ShopResult<FunctionStep> {
    Ok(FunctionStep {
        function_option_id: col(row, "function_option_id")?,
        step_id: col(row, "step_id")?,
        position: col(row, "position")?,
    })
}

pub(crate) fn step_option(row: &Row) -> ShopResult<StepOption> {
    Ok(StepOption {
        id: col(row, "id")?,
        step_id: col(row, "step_id")?,
        function_option_id: col(row, "function_option_id")?,
        labels: labels(row)?,
        price: col(row, "price")?,
        discount_percent: col(row, "discount_percent")?,
        sort_order: col(row, "sort_order")?,
    })
}

pub(crate) fn addon(row: &Row) -> ShopResult<Addon> {
    Ok(Addon {
        id: col(row, "id")?,
        step_id: col(row, "step_id")?,
        labels: labels(row)?,
        price: col(row, "price")?,
        gate_step_id: col(row, "gate_step_id")?,
        allowed_option_ids: col(row, "allowed_option_ids")?,
        sort_order: col(row, "sort_order")?,
    })
}

pub(crate) fn product(row: &Row) -> ShopResult<Product> {
    Ok(Product {
        id: col(row, "id")?,
        name: col(row, "name")?,
        description: col(row, "description")?,
        price: col(row, "price")?,
        stock: count(row, "stock")?,
        active: col(row, "active")?,
        free_shipping: col(row, "free_shipping")?,
        image_url: col(row, "image_url")?,
    })
}

pub(crate) fn cart_item(row: &Row) -> ShopResult<CartItem> {
    let configuration: Option<Json<Configuration>> = col(row, "configuration")?;
    Ok(CartItem {
        id: col(row, "id")?,
        quantity: count(row, "quantity")?,
        unit_price: col(row, "unit_price")?,
        title: col(row, "title")?,
        product_id: col(row, "product_id")?,
        configuration: configuration.map(|c| c.0),
    })
}

pub(crate) fn configuration_record(row: &Row) -> ShopResult<ConfigurationRecord> {
    let configuration: Option<Json<Configuration>> = col(row, "configuration")?;
    Ok(ConfigurationRecord {
        id: col(row, "id")?,
        status: parsed::<ConfigurationStatus>(row, "status")?,
        configuration: configuration.map(|c| c.0),
        product_id: col(row, "product_id")?,
        user_id: col(row, "user_id")?,
        total: col(row, "total")?,
        summary: col(row, "summary")?,
        created_at: col::<DateTime<Utc>>(row, "created_at")?,
        updated_at: col::<DateTime<Utc>>(row, "updated_at")?,
    })
}

pub(crate) fn order(row: &Row) -> ShopResult<Order> {
    let shipping: Option<Json<ShippingAddress>> = col(row, "shipping_address")?;
    Ok(Order {
        id: col(row, "id")?,
        session_id: col(row, "session_id")?,
        status: parsed::<OrderStatus>(row, "status")?,
        total: Price::from_minor(col(row, "total")?, parsed::<Currency>(row, "currency")?),
        summary: col(row, "summary")?,
        shipping_address: shipping.map(|s| s.0),
        customer_email: col(row, "customer_email")?,
        user_id: col(row, "user_id")?,
        configuration_id: col(row, "configuration_id")?,
        flow: parsed::<FlowKind>(row, "flow")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

/// Settings version derived from the newest row change
pub(crate) fn settings_version(latest: Option<DateTime<Utc>>) -> u64 {
    latest
        .map(|ts| ts.timestamp_micros().max(0) as u64)
        .unwrap_or(0)
}
