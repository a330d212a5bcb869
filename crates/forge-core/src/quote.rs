//! Resolve-then-price for a single configuration.

use crate::catalog::FunctionTree;
use crate::configuration::Configuration;
use crate::error::{ShopError, ShopResult};
use crate::pricing::{PriceBreakdown, PriceCalculator};
use crate::resolver::{resolve, IgnoredSelection, ResolvedLine};
use crate::settings::SettingsSnapshot;
use crate::store::ShopStore;
use serde::{Deserialize, Serialize};

/// Authoritative price of a configuration in base currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub function_option_id: String,
    /// Label of the function option
    pub title: String,
    pub summary: String,
    pub lines: Vec<ResolvedLine>,
    pub ignored: Vec<IgnoredSelection>,
    pub breakdown: PriceBreakdown,
}

impl Quote {
    pub fn total(&self) -> i64 {
        self.breakdown.total
    }
}

/// Price a configuration against an already loaded tree
pub fn price_tree(
    tree: &FunctionTree,
    configuration: &Configuration,
    global_discount_percent: f64,
    locale: &str,
) -> ShopResult<Quote> {
    let resolved = resolve(tree, configuration, locale)?;
    let breakdown = PriceCalculator::new(global_discount_percent).price(&resolved.lines);
    let summary = resolved.summary();
    let title = resolved
        .lines
        .first()
        .map(|l| l.label.clone())
        .unwrap_or_else(|| resolved.function_option_id.clone());

    Ok(Quote {
        function_option_id: resolved.function_option_id,
        title,
        summary,
        lines: resolved.lines,
        ignored: resolved.ignored,
        breakdown,
    })
}

/// Load the tree for the configuration's function option and price it
pub async fn quote_configuration(
    store: &dyn ShopStore,
    configuration: &Configuration,
    settings: &SettingsSnapshot,
    locale: &str,
) -> ShopResult<Quote> {
    let tree = store
        .function_tree(&configuration.function_option_id)
        .await?
        .ok_or_else(|| ShopError::UnresolvableConfiguration {
            function_option_id: configuration.function_option_id.clone(),
        })?;
    price_tree(&tree, configuration, settings.global_discount_percent, locale)
}
