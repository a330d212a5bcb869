//! # Configurations
//!
//! The client-submitted build selection and the durable record created for
//! it before the customer is redirected to payment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// A client-submitted build. Untrusted until resolved against the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub function_option_id: String,
    /// Selected option per step, aligned with the function's step order
    #[serde(default)]
    pub selections: Vec<Option<String>>,
    /// Selections for additive steps
    #[serde(default)]
    pub additive_selections: Vec<String>,
    #[serde(default)]
    pub addon_ids: Vec<String>,
    /// Price the client displayed; informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_price: Option<i64>,
}

impl Configuration {
    pub fn new(function_option_id: impl Into<String>) -> Self {
        Self {
            function_option_id: function_option_id.into(),
            ..Default::default()
        }
    }

    /// Builder: append the selection for the next step (`None` skips it)
    pub fn select(mut self, option_id: Option<&str>) -> Self {
        self.selections.push(option_id.map(String::from));
        self
    }

    /// Builder: add an additive-step selection
    pub fn add(mut self, option_id: impl Into<String>) -> Self {
        self.additive_selections.push(option_id.into());
        self
    }

    /// Builder: request an addon
    pub fn with_addon(mut self, addon_id: impl Into<String>) -> Self {
        self.addon_ids.push(addon_id.into());
        self
    }
}

/// Lifecycle of a persisted configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationStatus {
    Pending,
    Paid,
}

impl ConfigurationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigurationStatus::Pending => "pending",
            ConfigurationStatus::Paid => "paid",
        }
    }
}

impl FromStr for ConfigurationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConfigurationStatus::Pending),
            "paid" => Ok(ConfigurationStatus::Paid),
            other => Err(format!("unknown configuration status: {}", other)),
        }
    }
}

/// Durable anchor written before the payment redirect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub id: String,
    pub status: ConfigurationStatus,
    /// Snapshot of the build (custom flow)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Configuration>,
    /// Purchased product (built flow)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Server-computed total in base currency
    pub total: i64,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigurationRecord {
    /// Pending record for a configured build
    pub fn custom(configuration: Configuration, total: i64, summary: impl Into<String>) -> Self {
        Self::pending(Some(configuration), None, total, summary.into())
    }

    /// Pending record for a single ready-made product
    pub fn built(product_id: impl Into<String>, total: i64, summary: impl Into<String>) -> Self {
        Self::pending(None, Some(product_id.into()), total, summary.into())
    }

    fn pending(
        configuration: Option<Configuration>,
        product_id: Option<String>,
        total: i64,
        summary: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: ConfigurationStatus::Pending,
            configuration,
            product_id,
            user_id: None,
            total,
            summary,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: attach the purchasing user
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == ConfigurationStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_builder() {
        let cfg = Configuration::new("watch")
            .select(Some("steel"))
            .select(None)
            .add("engraving")
            .with_addon("buckle");

        assert_eq!(cfg.selections, vec![Some("steel".to_string()), None]);
        assert_eq!(cfg.additive_selections, vec!["engraving".to_string()]);
        assert_eq!(cfg.addon_ids, vec!["buckle".to_string()]);
    }

    #[test]
    fn test_configuration_accepts_sparse_payload() {
        let cfg: Configuration =
            serde_json::from_str(r#"{"function_option_id":"watch","selections":["steel",null]}"#)
                .unwrap();
        assert_eq!(cfg.selections.len(), 2);
        assert!(cfg.additive_selections.is_empty());
        assert!(cfg.client_price.is_none());
    }

    #[test]
    fn test_records_start_pending() {
        let record =
            ConfigurationRecord::built("p1", 12000, "Desk lamp").with_user(Some("u1".into()));
        assert!(record.is_pending());
        assert_eq!(record.product_id.as_deref(), Some("p1"));
        assert_eq!(record.user_id.as_deref(), Some("u1"));
        assert_ne!(
            record.id,
            ConfigurationRecord::custom(Configuration::new("watch"), 0, "").id
        );
    }
}
