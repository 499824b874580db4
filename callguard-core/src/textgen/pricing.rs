//! Per-model pricing for chat completions, in USD per million tokens.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::TextGenCfg;
use crate::envelope::CostCalculator;
use crate::model::ChatCompletion;

pub const DEFAULT_MODEL: &str = "gpt-4o";

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const FREE: ModelPrice = ModelPrice::new(0.0, 0.0);

    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / TOKENS_PER_UNIT) * self.input_per_million
            + (completion_tokens as f64 / TOKENS_PER_UNIT) * self.output_per_million
    }
}

static BUILTIN_PRICES: Lazy<HashMap<&'static str, ModelPrice>> = Lazy::new(|| {
    HashMap::from([
        ("gpt-4o", ModelPrice::new(2.50, 10.00)),
        ("gpt-4o-mini", ModelPrice::new(0.15, 0.60)),
        ("gpt-4.1", ModelPrice::new(2.00, 8.00)),
        ("gpt-4.1-mini", ModelPrice::new(0.40, 1.60)),
        ("gpt-4-turbo", ModelPrice::new(10.00, 30.00)),
        ("gpt-4", ModelPrice::new(30.00, 60.00)),
        ("gpt-3.5-turbo", ModelPrice::new(0.50, 1.50)),
    ])
});

/// Model name to price lookup.
///
/// Resolution order: exact name, then the longest configured name that the
/// model extends with a `-` suffix (dated snapshots such as
/// `gpt-4o-2024-08-06`), then the default model.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
    default_model: String,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PricingTable {
    pub fn builtin() -> Self {
        Self {
            prices: BUILTIN_PRICES
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Builtin prices overlaid with the configured ones.
    pub fn from_config(cfg: &TextGenCfg) -> Self {
        let mut table = Self::builtin();
        for p in &cfg.pricing {
            table = table.with_price(
                p.model.clone(),
                ModelPrice::new(p.input_per_million, p.output_per_million),
            );
        }
        if !cfg.default_model.trim().is_empty() {
            table.default_model = cfg.default_model.clone();
        }
        table
    }

    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn price_for(&self, model: Option<&str>) -> ModelPrice {
        model
            .filter(|m| !m.is_empty())
            .and_then(|m| self.lookup(m))
            .or_else(|| self.prices.get(&self.default_model).copied())
            .or_else(|| BUILTIN_PRICES.get(DEFAULT_MODEL).copied())
            .unwrap_or(ModelPrice::FREE)
    }

    fn lookup(&self, model: &str) -> Option<ModelPrice> {
        if let Some(p) = self.prices.get(model) {
            return Some(*p);
        }
        self.prices
            .iter()
            .filter(|(name, _)| {
                model
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.starts_with('-'))
            })
            .max_by_key(|(name, _)| name.len())
            .map(|(_, p)| *p)
    }

    /// Missing token counts count as zero.
    pub fn cost(
        &self,
        model: Option<&str>,
        prompt_tokens: Option<u64>,
        completion_tokens: Option<u64>,
    ) -> f64 {
        self.price_for(model)
            .cost(prompt_tokens.unwrap_or(0), completion_tokens.unwrap_or(0))
    }
}

/// Cost strategy for chat completions priced from the response's own model
/// name and usage block.
#[derive(Debug, Clone, Default)]
pub struct ModelPricing {
    table: PricingTable,
}

impl ModelPricing {
    pub fn new(table: PricingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PricingTable {
        &self.table
    }
}

impl CostCalculator<ChatCompletion> for ModelPricing {
    fn cost(&self, result: &ChatCompletion, _tokens_used: Option<u64>) -> f64 {
        let Some(usage) = result.usage else {
            return 0.0;
        };
        self.table.cost(
            Some(result.model.as_str()),
            Some(usage.prompt_tokens),
            Some(usage.completion_tokens),
        )
    }
}
