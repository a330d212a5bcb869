//! # forge-wasm
//!
//! WebAssembly bindings for the forgecart configurator.
//!
//! Runs the same resolver and price calculator as checkout so the UI can
//! show a live total while the customer builds. Previews are informational;
//! checkout always re-prices on the server.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { preview_total, format_amount } from 'forgecart-wasm';
//!
//! await init();
//!
//! const total = preview_total(treeJson, JSON.stringify(configuration), 5);
//! console.log('Total:', format_amount(total, 'eur'));
//! ```
//!
//! ## Building
//!
//! ```bash
//! wasm-pack build --target web
//! ```

use forge_core::{price_tree, Configuration, Currency, FunctionTree, Price, Quote};
use wasm_bindgen::prelude::*;

fn parse_tree(tree_json: &str) -> Result<FunctionTree, String> {
    serde_json::from_str(tree_json).map_err(|e| format!("invalid function tree: {}", e))
}

fn parse_configuration(configuration_json: &str) -> Result<Configuration, String> {
    serde_json::from_str(configuration_json).map_err(|e| format!("invalid configuration: {}", e))
}

fn quote(
    tree_json: &str,
    configuration_json: &str,
    global_discount: f64,
    locale: &str,
) -> Result<Quote, String> {
    let tree = parse_tree(tree_json)?;
    let configuration = parse_configuration(configuration_json)?;
    price_tree(&tree, &configuration, global_discount, locale).map_err(|e| e.to_string())
}

fn amount_display(amount: i64, currency: &str) -> Result<String, String> {
    let currency: Currency = currency.parse()?;
    Ok(Price::from_minor(amount, currency).display())
}

/// Preview total, in smallest units of the catalog's base currency
#[wasm_bindgen]
pub fn preview_total(
    tree_json: &str,
    configuration_json: &str,
    global_discount: f64,
) -> Result<i64, JsValue> {
    quote(tree_json, configuration_json, global_discount, "en")
        .map(|q| q.total())
        .map_err(|e| JsValue::from_str(&e))
}

/// Full preview (lines, ignored selections, breakdown) as a JS object
#[wasm_bindgen]
pub fn preview_quote(
    tree_json: &str,
    configuration_json: &str,
    global_discount: f64,
    locale: &str,
) -> Result<JsValue, JsValue> {
    let quote = quote(tree_json, configuration_json, global_discount, locale)
        .map_err(|e| JsValue::from_str(&e))?;
    serde_wasm_bindgen::to_value(&quote).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Format an amount in smallest units, e.g. `format_amount(11210, "eur")` is `€112.10`
#[wasm_bindgen]
pub fn format_amount(amount: i64, currency: &str) -> Result<String, JsValue> {
    amount_display(amount, currency).map_err(|e| JsValue::from_str(&e))
}

/// Log to browser console
#[wasm_bindgen]
pub fn log(message: &str) {
    web_sys::console::log_1(&JsValue::from_str(message));
}

/// Get library version
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
