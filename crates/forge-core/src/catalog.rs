//! # Catalog Types
//!
//! Read-only catalog data consumed by the pricing pipeline: ready-made
//! products and the configurator tree (function options, steps, options,
//! addons). Amounts are in the smallest unit of the base currency.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Step key reserved for steps whose selections form a set.
pub const ADDITIVE_STEP_KEY: &str = "extras";

/// Step key reported for the function option's own line.
pub const FUNCTION_STEP_KEY: &str = "function";

/// Labels keyed by locale (`en`, `cs`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(pub BTreeMap<String, String>);

impl LocalizedText {
    /// Create with a single English label
    pub fn new(en: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("en".to_string(), en.into());
        Self(map)
    }

    /// Builder: add a translation
    pub fn with(mut self, locale: impl Into<String>, text: impl Into<String>) -> Self {
        self.0.insert(locale.into(), text.into());
        self
    }

    /// Pick the label for `locale`: exact match, then its language part,
    /// then English, then whatever exists.
    pub fn resolve(&self, locale: &str) -> Option<&str> {
        let language = locale.split(['-', '_']).next().unwrap_or(locale);
        self.0
            .get(locale)
            .or_else(|| self.0.get(language))
            .or_else(|| self.0.get("en"))
            .or_else(|| self.0.values().next())
            .map(String::as_str)
    }
}

/// Root selector of a build (e.g. a product family)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionOption {
    pub id: String,
    #[serde(default)]
    pub labels: LocalizedText,
    /// Base price
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub discount_percent: f64,
}

/// A stage of the configuration wizard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_key: String,
    #[serde(default)]
    pub labels: LocalizedText,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub sort_order: i32,
}

impl Step {
    /// Selections in this step are additive rather than single-choice
    pub fn is_additive(&self) -> bool {
        self.step_key == ADDITIVE_STEP_KEY
    }
}

/// Row of the function-to-step mapping table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionStep {
    pub function_option_id: String,
    pub step_id: String,
    pub position: i32,
}

/// A selectable choice within a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOption {
    pub id: String,
    pub step_id: String,
    /// Restricts the option to one function option; `None` means any
    #[serde(default)]
    pub function_option_id: Option<String>,
    #[serde(default)]
    pub labels: LocalizedText,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub discount_percent: f64,
    #[serde(default)]
    pub sort_order: i32,
}

impl StepOption {
    pub fn available_for(&self, function_option_id: &str) -> bool {
        self.function_option_id
            .as_deref()
            .map_or(true, |scope| scope == function_option_id)
    }
}

/// Flat-price extra tied to a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Addon {
    pub id: String,
    pub step_id: String,
    #[serde(default)]
    pub labels: LocalizedText,
    #[serde(default)]
    pub price: i64,
    /// Step whose current selection gates this addon
    #[serde(default)]
    pub gate_step_id: Option<String>,
    /// Option ids of the gate step that unlock this addon
    #[serde(default)]
    pub allowed_option_ids: Vec<String>,
    #[serde(default)]
    pub sort_order: i32,
}

impl Addon {
    /// Whether the addon is unlocked by the given selections of its gate step
    pub fn unlocked_by<'a>(&self, gate_selection: impl IntoIterator<Item = &'a str>) -> bool {
        if self.gate_step_id.is_none() {
            return true;
        }
        gate_selection
            .into_iter()
            .any(|id| self.allowed_option_ids.iter().any(|allowed| allowed == id))
    }
}

/// Everything the resolver needs for one function option, with steps in
/// wizard order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionTree {
    pub function: FunctionOption,
    pub steps: Vec<Step>,
    pub options: Vec<StepOption>,
    pub addons: Vec<Addon>,
}

impl FunctionTree {
    /// Build the tree for `function` from raw catalog tables.
    ///
    /// Steps follow the mapping position (ties broken by the step's own
    /// sort order). Options out of scope for the function and rows tied to
    /// unmapped steps are dropped.
    pub fn assemble(
        function: FunctionOption,
        steps: &[Step],
        mappings: &[FunctionStep],
        options: &[StepOption],
        addons: &[Addon],
    ) -> Self {
        let mut mapped: Vec<(&FunctionStep, &Step)> = mappings
            .iter()
            .filter(|m| m.function_option_id == function.id)
            .filter_map(|m| steps.iter().find(|s| s.id == m.step_id).map(|s| (m, s)))
            .collect();
        mapped.sort_by_key(|(m, s)| (m.position, s.sort_order));

        let steps: Vec<Step> = mapped.into_iter().map(|(_, s)| s.clone()).collect();
        let is_mapped = |step_id: &str| steps.iter().any(|s| s.id == step_id);

        let mut options: Vec<StepOption> = options
            .iter()
            .filter(|o| is_mapped(&o.step_id) && o.available_for(&function.id))
            .cloned()
            .collect();
        options.sort_by_key(|o| o.sort_order);

        let mut addons: Vec<Addon> = addons
            .iter()
            .filter(|a| is_mapped(&a.step_id))
            .cloned()
            .collect();
        addons.sort_by_key(|a| a.sort_order);

        Self {
            function,
            steps,
            options,
            addons,
        }
    }

    /// Look up an option of `step_id` that is in scope for this function
    pub fn option(&self, step_id: &str, option_id: &str) -> Option<&StepOption> {
        self.options.iter().find(|o| {
            o.step_id == step_id && o.id == option_id && o.available_for(&self.function.id)
        })
    }

    pub fn addons_for<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a Addon> + 'a {
        self.addons.iter().filter(move |a| a.step_id == step_id)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A ready-made catalog product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Current price
    pub price: i64,
    /// Units on hand
    #[serde(default)]
    pub stock: u32,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub free_shipping: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: i64, stock: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            price,
            stock,
            active: true,
            free_shipping: false,
            image_url: None,
        }
    }

    /// Builder: set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: mark as shipped for free
    pub fn with_free_shipping(mut self, free: bool) -> Self {
        self.free_shipping = free;
        self
    }

    /// Builder: set active flag
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}
