//! Cost ledger for one top-level research request.
//!
//! Entries are appended as calls complete and are never mutated. Pricing is
//! resolved only when the total is computed; a model without known pricing
//! contributes zero rather than failing the run.

use crate::llm::TokenUsage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CostEntry {
    Llm {
        model_id: String,
        usage: TokenUsage,
        source: String,
    },
    Api {
        api_name: String,
        cost_cents: u64,
    },
}

/// Per-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_price_per_token: f64,
    pub output_price_per_token: f64,
}

impl ModelPricing {
    pub fn per_million(input: f64, output: f64) -> Self {
        Self {
            input_price_per_token: input / 1_000_000.0,
            output_price_per_token: output / 1_000_000.0,
        }
    }

    /// Cost of `usage` in cents, rounded up.
    pub fn cost_cents(&self, usage: &TokenUsage) -> f64 {
        let dollars = usage.input_tokens as f64 * self.input_price_per_token
            + usage.output_tokens as f64 * self.output_price_per_token;
        (dollars * 100.0).ceil()
    }
}

pub trait PricingLookup: Send + Sync {
    fn model_pricing(&self, model_id: &str) -> Option<ModelPricing>;
}

impl<F> PricingLookup for F
where
    F: Fn(&str) -> Option<ModelPricing> + Send + Sync,
{
    fn model_pricing(&self, model_id: &str) -> Option<ModelPricing> {
        self(model_id)
    }
}

/// Built-in price table keyed on model id prefixes (USD per million tokens).
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPricing;

impl PricingLookup for StaticPricing {
    fn model_pricing(&self, model_id: &str) -> Option<ModelPricing> {
        let id = model_id.to_lowercase();
        // Provider prefixes like "openai/gpt-4o" are ignored.
        let id = id.rsplit('/').next().unwrap_or(&id);

        // More specific prefixes first.
        const TABLE: &[(&str, f64, f64)] = &[
            ("gpt-5-nano", 0.05, 0.40),
            ("gpt-5-mini", 0.25, 2.00),
            ("gpt-5", 1.25, 10.00),
            ("gpt-4.1-nano", 0.10, 0.40),
            ("gpt-4.1-mini", 0.40, 1.60),
            ("gpt-4.1", 2.00, 8.00),
            ("gpt-4o-mini", 0.15, 0.60),
            ("gpt-4o", 2.50, 10.00),
            ("gpt-4-turbo", 10.00, 30.00),
            ("gpt-3.5-turbo", 0.50, 1.50),
            ("o4-mini", 1.10, 4.40),
            ("o3-mini", 1.10, 4.40),
            ("o3", 2.00, 8.00),
            ("claude-opus-4", 15.00, 75.00),
            ("claude-sonnet-4", 3.00, 15.00),
            ("claude-3-5-haiku", 0.80, 4.00),
            ("gemini-2.5-pro", 1.25, 10.00),
            ("gemini-2.5-flash", 0.30, 2.50),
        ];

        TABLE
            .iter()
            .find(|(prefix, _, _)| id.starts_with(prefix))
            .map(|(_, input, output)| ModelPricing::per_million(*input, *output))
    }
}

/// Append-only ledger shared by every component of one request.
pub struct CostAccumulator {
    entries: Mutex<Vec<CostEntry>>,
    pricing: Arc<dyn PricingLookup>,
}

impl CostAccumulator {
    pub fn new(pricing: Arc<dyn PricingLookup>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            pricing,
        }
    }

    pub fn add_llm_cost(&self, model_id: &str, usage: TokenUsage, source: &str) {
        self.push(CostEntry::Llm {
            model_id: model_id.to_string(),
            usage,
            source: source.to_string(),
        });
    }

    /// Records a flat fee. Zero and negative amounts are dropped.
    pub fn add_api_cost(&self, api_name: &str, cost_cents: i64) {
        if cost_cents <= 0 {
            return;
        }
        self.push(CostEntry::Api {
            api_name: api_name.to_string(),
            cost_cents: cost_cents as u64,
        });
    }

    pub fn total_cost_cents(&self) -> u64 {
        let total: f64 = self
            .entries()
            .iter()
            .map(|entry| match entry {
                CostEntry::Api { cost_cents, .. } => *cost_cents as f64,
                CostEntry::Llm {
                    model_id, usage, ..
                } => self
                    .pricing
                    .model_pricing(model_id)
                    .map_or(0.0, |pricing| pricing.cost_cents(usage)),
            })
            .sum();
        total.ceil() as u64
    }

    pub fn entries(&self) -> Vec<CostEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, entry: CostEntry) {
        self.lock().push(entry);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CostEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CostAccumulator {
    fn default() -> Self {
        Self::new(Arc::new(StaticPricing))
    }
}

impl std::fmt::Debug for CostAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostAccumulator")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
        }
    }

    fn flat_pricing() -> Arc<dyn PricingLookup> {
        // 1 cent per input token, 2 cents per output token for "priced", nothing else.
        Arc::new(|model: &str| {
            (model == "priced").then_some(ModelPricing {
                input_price_per_token: 0.01,
                output_price_per_token: 0.02,
            })
        })
    }

    #[test]
    fn test_empty_ledger_costs_nothing() {
        let costs = CostAccumulator::default();
        assert_eq!(costs.total_cost_cents(), 0);
        assert!(costs.is_empty());
    }

    #[test]
    fn test_non_positive_api_costs_are_dropped() {
        let costs = CostAccumulator::default();
        costs.add_api_cost("tavily", 0);
        costs.add_api_cost("tavily", -5);
        assert!(costs.is_empty());

        costs.add_api_cost("tavily", 3);
        assert_eq!(costs.len(), 1);
        assert_eq!(costs.total_cost_cents(), 3);
    }

    #[test]
    fn test_llm_cost_uses_pricing() {
        let costs = CostAccumulator::new(flat_pricing());
        costs.add_llm_cost("priced", usage(10, 5), "deep-research-researcher");
        assert_eq!(costs.total_cost_cents(), 20);
    }

    #[test]
    fn test_unknown_model_contributes_zero() {
        let costs = CostAccumulator::new(flat_pricing());
        costs.add_llm_cost("mystery-model", usage(1_000_000, 1_000_000), "x");
        costs.add_api_cost("exa", 1);
        assert_eq!(costs.len(), 2);
        assert_eq!(costs.total_cost_cents(), 1);
    }

    #[test]
    fn test_fractional_entry_is_rounded_up() {
        let costs = CostAccumulator::default();
        // gpt-4o-mini input: $0.15 / 1M tokens; 1000 tokens is 0.015 cents.
        costs.add_llm_cost("gpt-4o-mini", usage(1000, 0), "x");
        assert_eq!(costs.total_cost_cents(), 1);
    }

    #[test]
    fn test_entries_keep_append_order() {
        let costs = CostAccumulator::default();
        costs.add_llm_cost("gpt-4o", usage(1, 1), "deep-research-supervisor");
        costs.add_api_cost("tavily", 1);
        let entries = costs.entries();
        assert!(matches!(entries[0], CostEntry::Llm { .. }));
        assert!(matches!(entries[1], CostEntry::Api { .. }));
    }

    #[test]
    fn test_static_pricing_prefers_specific_prefix() {
        let mini = StaticPricing.model_pricing("gpt-4o-mini-2024-07-18").unwrap();
        let full = StaticPricing.model_pricing("openai/gpt-4o").unwrap();
        assert!(mini.input_price_per_token < full.input_price_per_token);
        assert!(StaticPricing.model_pricing("llama3.1:8b").is_none());
    }

    proptest! {
        #[test]
        fn prop_total_never_decreases(
            ops in prop::collection::vec((any::<bool>(), 0u64..50_000, 0u64..50_000, -10i64..100), 0..40)
        ) {
            let costs = CostAccumulator::new(flat_pricing());
            let mut previous = costs.total_cost_cents();
            for (is_llm, input, output, cents) in ops {
                if is_llm {
                    costs.add_llm_cost("priced", usage(input, output), "prop");
                } else {
                    costs.add_api_cost("api", cents);
                }
                let current = costs.total_cost_cents();
                prop_assert!(current >= previous);
                previous = current;
            }
        }
    }
}
