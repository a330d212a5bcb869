//! # Configuration Resolver
//!
//! Walks a client-submitted [`Configuration`] against a [`FunctionTree`]
//! snapshot and produces the ordered, priced line items the calculator
//! consumes. Nothing submitted by the client carries a price; every amount
//! comes from the tree.
//!
//! Line order is: the function option itself, then for each step in wizard
//! order its selected options followed by its unlocked addons.

use crate::catalog::{FunctionTree, LocalizedText, Step, FUNCTION_STEP_KEY};
use crate::configuration::Configuration;
use crate::error::{ShopError, ShopResult};
use crate::pricing::effective_price;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// Where a line item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Function,
    Option,
    Addon,
}

/// One priced element of a resolved configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLine {
    pub id: String,
    pub label: String,
    pub step_key: String,
    pub kind: LineKind,
    /// List price in base currency minor units
    pub unit_price: i64,
    pub discount_percent: f64,
}

impl ResolvedLine {
    pub fn effective_price(&self) -> f64 {
        effective_price(self.unit_price, self.discount_percent)
    }
}

/// Why a submitted id did not produce a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Not an option of the step it was submitted for
    UnknownOption,
    /// Additive selection that matches no additive step of this function
    NotAdditive,
    /// Addon whose gate step selection is not on its allow-list
    AddonGated,
    UnknownAddon,
}

/// A submitted id that was skipped during resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_key: Option<String>,
    pub id: String,
    pub reason: IgnoreReason,
}

/// Validated, ordered line items for one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfiguration {
    pub function_option_id: String,
    pub lines: Vec<ResolvedLine>,
    #[serde(default)]
    pub ignored: Vec<IgnoredSelection>,
}

impl ResolvedConfiguration {
    /// Human-readable description, e.g. `Watch: Steel, Blue, Buckle`
    pub fn summary(&self) -> String {
        let mut lines = self.lines.iter();
        let head = match lines.next() {
            Some(line) => line.label.clone(),
            None => return self.function_option_id.clone(),
        };
        let rest: Vec<&str> = lines.map(|l| l.label.as_str()).collect();
        if rest.is_empty() {
            head
        } else {
            format!("{}: {}", head, rest.join(", "))
        }
    }
}

fn label(labels: &LocalizedText, locale: &str, fallback: &str) -> String {
    labels.resolve(locale).unwrap_or(fallback).to_string()
}

/// Resolve `configuration` against `tree`.
///
/// Fails with [`ShopError::UnresolvableConfiguration`] when the tree belongs
/// to a different function option or the function has no mapped steps.
/// Unknown or missing selections are skipped; skipped ids are reported in
/// [`ResolvedConfiguration::ignored`].
pub fn resolve(
    tree: &FunctionTree,
    configuration: &Configuration,
    locale: &str,
) -> ShopResult<ResolvedConfiguration> {
    if tree.function.id != configuration.function_option_id || tree.is_empty() {
        return Err(ShopError::UnresolvableConfiguration {
            function_option_id: configuration.function_option_id.clone(),
        });
    }

    let function = &tree.function;
    let mut lines = vec![ResolvedLine {
        id: function.id.clone(),
        label: label(&function.labels, locale, &function.id),
        step_key: FUNCTION_STEP_KEY.to_string(),
        kind: LineKind::Function,
        unit_price: function.price,
        discount_percent: function.discount_percent,
    }];
    let mut ignored = Vec::new();

    // Selected option ids per step, in step order
    let selected: Vec<Vec<&str>> = tree
        .steps
        .iter()
        .enumerate()
        .map(|(position, step)| select_for_step(tree, step, position, configuration, &mut ignored))
        .collect();

    let additive_ids: HashSet<&str> = selected
        .iter()
        .zip(&tree.steps)
        .filter(|(_, step)| step.is_additive())
        .flat_map(|(ids, _)| ids.iter().copied())
        .collect();
    let mut seen = HashSet::new();
    for id in &configuration.additive_selections {
        if !additive_ids.contains(id.as_str()) && seen.insert(id.as_str()) {
            ignored.push(IgnoredSelection {
                step_key: None,
                id: id.clone(),
                reason: IgnoreReason::NotAdditive,
            });
        }
    }

    let requested_addons: Vec<&str> = dedup(configuration.addon_ids.iter().map(String::as_str));
    for id in &requested_addons {
        if !tree.addons.iter().any(|a| a.id == *id) {
            ignored.push(IgnoredSelection {
                step_key: None,
                id: id.to_string(),
                reason: IgnoreReason::UnknownAddon,
            });
        }
    }

    for (step, option_ids) in tree.steps.iter().zip(&selected) {
        for option_id in option_ids {
            if let Some(option) = tree.option(&step.id, option_id) {
                lines.push(ResolvedLine {
                    id: option.id.clone(),
                    label: label(&option.labels, locale, &option.id),
                    step_key: step.step_key.clone(),
                    kind: LineKind::Option,
                    unit_price: option.price,
                    discount_percent: option.discount_percent,
                });
            }
        }

        for addon in tree.addons_for(&step.id) {
            if !requested_addons.contains(&addon.id.as_str()) {
                continue;
            }
            let gate_selection = addon
                .gate_step_id
                .as_deref()
                .and_then(|gate| tree.steps.iter().position(|s| s.id == gate))
                .map(|idx| selected[idx].clone())
                .unwrap_or_default();
            if !addon.unlocked_by(gate_selection) {
                ignored.push(IgnoredSelection {
                    step_key: Some(step.step_key.clone()),
                    id: addon.id.clone(),
                    reason: IgnoreReason::AddonGated,
                });
                continue;
            }
            lines.push(ResolvedLine {
                id: addon.id.clone(),
                label: label(&addon.labels, locale, &addon.id),
                step_key: step.step_key.clone(),
                kind: LineKind::Addon,
                unit_price: addon.price,
                discount_percent: 0.0,
            });
        }
    }

    if !ignored.is_empty() {
        warn!(
            function_option_id = %function.id,
            ignored = ?ignored.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            "configuration contained selections that were skipped"
        );
    }

    Ok(ResolvedConfiguration {
        function_option_id: function.id.clone(),
        lines,
        ignored,
    })
}

/// Option ids of `step` that the configuration selects and the tree knows.
fn select_for_step<'a>(
    tree: &FunctionTree,
    step: &Step,
    position: usize,
    configuration: &'a Configuration,
    ignored: &mut Vec<IgnoredSelection>,
) -> Vec<&'a str> {
    if step.is_additive() {
        return dedup(configuration.additive_selections.iter().map(String::as_str))
            .into_iter()
            .filter(|id| tree.option(&step.id, id).is_some())
            .collect();
    }

    match configuration.selections.get(position).and_then(Option::as_deref) {
        Some(id) if tree.option(&step.id, id).is_some() => vec![id],
        Some(id) => {
            ignored.push(IgnoredSelection {
                step_key: Some(step.step_key.clone()),
                id: id.to_string(),
                reason: IgnoreReason::UnknownOption,
            });
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn dedup<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{Addon, FunctionOption, FunctionStep, StepOption};
    use crate::pricing::PriceCalculator;

    fn step(id: &str, key: &str) -> Step {
        Step {
            id: id.into(),
            step_key: key.into(),
            labels: LocalizedText::new(id),
            optional: false,
            sort_order: 0,
        }
    }

    fn option(id: &str, step: &str, price: i64, discount: f64) -> StepOption {
        StepOption {
            id: id.into(),
            step_id: step.into(),
            function_option_id: None,
            labels: LocalizedText::new(id).with("cs", format!("{} (cs)", id)),
            price,
            discount_percent: discount,
            sort_order: 0,
        }
    }

    /// Watch with case, dial, strap and an additive extras step. Prices are
    /// minor units (500.00 case at 10%, 200.00 dial, 50.00 buckle).
    pub(crate) fn watch_tree() -> FunctionTree {
        let function = FunctionOption {
            id: "watch".into(),
            labels: LocalizedText::new("Watch").with("cs", "Hodinky"),
            price: 0,
            discount_percent: 0.0,
        };
        let steps = vec![
            step("s-case", "case"),
            step("s-dial", "dial"),
            step("s-strap", "strap"),
            step("s-extras", "extras"),
        ];
        let mappings: Vec<FunctionStep> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| FunctionStep {
                function_option_id: "watch".into(),
                step_id: s.id.clone(),
                position: i as i32,
            })
            .collect();
        let mut titanium = option("titanium", "s-case", 90000, 0.0);
        titanium.function_option_id = Some("clock".into());
        let options = vec![
            option("steel", "s-case", 50000, 10.0),
            option("bronze", "s-case", 60000, 0.0),
            titanium,
            option("blue", "s-dial", 20000, 0.0),
            option("leather", "s-strap", 0, 0.0),
            option("box", "s-extras", 3000, 0.0),
            option("papers", "s-extras", 1000, 0.0),
        ];
        let addons = vec![
            Addon {
                id: "buckle".into(),
                step_id: "s-strap".into(),
                labels: LocalizedText::new("Buckle"),
                price: 5000,
                gate_step_id: Some("s-case".into()),
                allowed_option_ids: vec!["steel".into()],
                sort_order: 0,
            },
            Addon {
                id: "polish".into(),
                step_id: "s-case".into(),
                labels: LocalizedText::new("Polish"),
                price: 700,
                gate_step_id: None,
                allowed_option_ids: vec![],
                sort_order: 0,
            },
        ];
        FunctionTree::assemble(function, &steps, &mappings, &options, &addons)
    }

    pub(crate) fn watch_configuration() -> Configuration {
        Configuration::new("watch")
            .select(Some("steel"))
            .select(Some("blue"))
            .select(None)
            .with_addon("buckle")
    }

    #[test]
    fn test_case_dial_strap_scenario() {
        let resolved = resolve(&watch_tree(), &watch_configuration(), "en").unwrap();

        let ids: Vec<_> = resolved.lines.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["watch", "steel", "blue", "buckle"]);
        assert!(resolved.ignored.is_empty());

        let breakdown = PriceCalculator::new(5.0).price(&resolved.lines);
        assert_eq!(breakdown.total, 66500);
    }

    #[test]
    fn test_unknown_function_is_unresolvable() {
        let cfg = Configuration::new("toaster").select(Some("steel"));
        let err = resolve(&watch_tree(), &cfg, "en").unwrap_err();
        assert!(matches!(
            err,
            ShopError::UnresolvableConfiguration { ref function_option_id }
                if function_option_id == "toaster"
        ));
    }

    #[test]
    fn test_function_without_steps_is_unresolvable() {
        let tree = FunctionTree {
            function: watch_tree().function,
            steps: vec![],
            options: vec![],
            addons: vec![],
        };
        assert!(resolve(&tree, &Configuration::new("watch"), "en").is_err());
    }

    #[test]
    fn test_out_of_scope_option_is_skipped() {
        let cfg = Configuration::new("watch").select(Some("titanium")).select(Some("blue"));
        let resolved = resolve(&watch_tree(), &cfg, "en").unwrap();

        assert!(resolved.lines.iter().all(|l| l.id != "titanium"));
        assert_eq!(resolved.ignored.len(), 1);
        assert_eq!(resolved.ignored[0].reason, IgnoreReason::UnknownOption);
    }

    #[test]
    fn test_gated_addon_requires_allowed_selection() {
        let cfg = Configuration::new("watch")
            .select(Some("bronze"))
            .with_addon("buckle")
            .with_addon("polish");
        let resolved = resolve(&watch_tree(), &cfg, "en").unwrap();

        let ids: Vec<_> = resolved.lines.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["watch", "bronze", "polish"]);
        assert_eq!(resolved.ignored[0].id, "buckle");
        assert_eq!(resolved.ignored[0].reason, IgnoreReason::AddonGated);
    }

    #[test]
    fn test_additive_selections_are_deduped_and_strays_reported() {
        let cfg = Configuration::new("watch")
            .select(Some("steel"))
            .add("box")
            .add("papers")
            .add("box")
            .add("blue")
            .with_addon("gift-wrap");
        let resolved = resolve(&watch_tree(), &cfg, "en").unwrap();

        let extras: Vec<_> = resolved
            .lines
            .iter()
            .filter(|l| l.step_key == "extras")
            .map(|l| l.id.as_str())
            .collect();
        assert_eq!(extras, vec!["box", "papers"]);

        let reasons: Vec<_> = resolved.ignored.iter().map(|i| (i.id.as_str(), i.reason)).collect();
        assert_eq!(
            reasons,
            vec![("blue", IgnoreReason::NotAdditive), ("gift-wrap", IgnoreReason::UnknownAddon)]
        );
    }

    #[test]
    fn test_labels_follow_locale() {
        let resolved = resolve(&watch_tree(), &watch_configuration(), "cs-CZ").unwrap();
        assert_eq!(resolved.lines[0].label, "Hodinky");
        assert_eq!(resolved.lines[1].label, "steel (cs)");
        assert_eq!(resolved.summary(), "Hodinky: steel (cs), blue (cs), Buckle");
    }
}
