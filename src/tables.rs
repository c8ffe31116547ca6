//! Read-only reference data: per-model prices and default output lengths.
//!
//! Both tables are YAML. Built-in copies ship with the crate and can be
//! replaced by files or strings at client construction.

use crate::cost::{Cost, ModelPrice};
use crate::error::Error;
use crate::types::Usage;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_PRICES: &str = include_str!("../data/price_data.yaml");
const BUILTIN_MAX_OUTPUT_TOKENS: &str = include_str!("../data/max_output_token_data.yaml");

/// Model name to per-token price.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceTable {
    #[serde(default)]
    model: HashMap<String, ModelPrice>,
}

impl PriceTable {
    /// Parse a table of the form `model: { <name>: { input_tokens, output_tokens } }`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("price table: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_yaml_str(&read(path.as_ref())?)
    }

    /// Get pricing for a model.
    pub fn get(&self, model: &str) -> Option<&ModelPrice> {
        self.model.get(model)
    }

    /// Pricing for a model, or a configuration error naming it.
    pub fn require(&self, model: &str) -> Result<&ModelPrice, Error> {
        self.get(model)
            .ok_or_else(|| Error::Config(format!("no price entry for model {model}")))
    }

    /// Add or update pricing for a model.
    pub fn set(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.model.insert(model.into(), price);
    }

    /// Calculate cost for a model and usage.
    pub fn calculate_cost(&self, model: &str, usage: &Usage) -> Option<Cost> {
        self.get(model).map(|p| p.calculate(usage))
    }
}

/// Model name to default maximum output length.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct MaxOutputTokenTable {
    limits: HashMap<String, u32>,
}

impl MaxOutputTokenTable {
    /// Parse a flat `<name>: <tokens>` mapping.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str::<Option<Self>>(yaml)
            .map(Option::unwrap_or_default)
            .map_err(|e| Error::Config(format!("max output token table: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_yaml_str(&read(path.as_ref())?)
    }

    pub fn get(&self, model: &str) -> Option<u32> {
        self.limits.get(model).copied()
    }

    pub fn set(&mut self, model: impl Into<String>, tokens: u32) {
        self.limits.insert(model.into(), tokens);
    }
}

/// Both reference tables, shared read-only by every model client.
#[derive(Debug, Clone, Default)]
pub struct ModelTables {
    pub prices: PriceTable,
    pub max_output_tokens: MaxOutputTokenTable,
}

impl ModelTables {
    pub fn new(prices: PriceTable, max_output_tokens: MaxOutputTokenTable) -> Self {
        Self {
            prices,
            max_output_tokens,
        }
    }

    /// Tables bundled with the crate.
    pub fn builtin() -> Result<Self, Error> {
        Ok(Self {
            prices: PriceTable::from_yaml_str(BUILTIN_PRICES)?,
            max_output_tokens: MaxOutputTokenTable::from_yaml_str(BUILTIN_MAX_OUTPUT_TOKENS)?,
        })
    }

    /// Load both tables from YAML files.
    pub fn from_paths(
        prices: impl AsRef<Path>,
        max_output_tokens: impl AsRef<Path>,
    ) -> Result<Self, Error> {
        Ok(Self {
            prices: PriceTable::from_path(prices)?,
            max_output_tokens: MaxOutputTokenTable::from_path(max_output_tokens)?,
        })
    }
}

fn read(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_table_yaml() {
        let table = PriceTable::from_yaml_str(
            "model:\n  m1:\n    input_tokens: 0.001\n    output_tokens: 0.002\n",
        )
        .unwrap();
        let price = table.get("m1").unwrap();
        assert!((price.input_tokens - 0.001).abs() < 1e-12);
        assert!((price.output_tokens - 0.002).abs() < 1e-12);
        assert!(table.get("m2").is_none());
    }

    #[test]
    fn test_missing_price_is_config_error() {
        let table = PriceTable::default();
        assert!(matches!(table.require("m1"), Err(Error::Config(_))));
    }

    #[test]
    fn test_max_output_yaml() {
        let table = MaxOutputTokenTable::from_yaml_str("m1: 512\nm2: 1024\n").unwrap();
        assert_eq!(table.get("m1"), Some(512));
        assert_eq!(table.get("m3"), None);

        let empty = MaxOutputTokenTable::from_yaml_str("~\n").unwrap();
        assert_eq!(empty.get("m1"), None);
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            PriceTable::from_yaml_str("model: [1, 2"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_builtin_tables_load() {
        let tables = ModelTables::builtin().unwrap();
        assert!(tables
            .prices
            .get("llama-3.1-sonar-small-128k-online")
            .is_some());
        assert_eq!(
            tables
                .max_output_tokens
                .get("llama-3.1-sonar-small-128k-online"),
            Some(4096)
        );
    }

    #[test]
    fn test_calculate_cost() {
        let mut table = PriceTable::default();
        table.set("m1", ModelPrice::new(0.5, 1.0));
        let usage = Usage {
            prompt_tokens: 2,
            completion_tokens: 3,
            total_tokens: 5,
        };
        let cost = table.calculate_cost("m1", &usage).unwrap();
        assert!((cost.total() - 4.0).abs() < 1e-12);
        assert!(table.calculate_cost("m2", &usage).is_none());
    }
}
