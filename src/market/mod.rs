//! 📈 Market classifiers
//!
//! Both classifiers work off the same normalised book of implied probabilities,
//! built once per race from the decision snapshot.

pub mod concentration;
pub mod roles;

pub use concentration::{ChaosComponents, ChaosResult, ConcentrationClassifier};
pub use roles::{MarketRoleClassifier, RoleAssignment, RunnerRoleEntry};

use crate::error::PipelineError;
use crate::types::MarketSnapshot;

/// Implied probability of one priced runner, overround removed
#[derive(Debug, Clone, PartialEq)]
pub struct ImpliedProbability {
    pub runner_id: String,
    pub price: f64,
    pub probability: f64,
    pub traded_volume: Option<f64>,
}

/// Normalised market for one race
///
/// Only built through `from_snapshot`, so it always holds at least two priced runners.
#[derive(Debug, Clone)]
pub struct MarketBook {
    race_id: String,
    /// Priced runners in snapshot order
    entries: Vec<ImpliedProbability>,
    /// Runners in the snapshot without a usable price
    unpriced: Vec<String>,
    /// Sum of raw implied probabilities before normalisation
    overround: f64,
    /// max(declared field size, runners in snapshot)
    field_size: u32,
}

impl MarketBook {
    /// Convert prices to implied probabilities and normalise them to sum to 1
    ///
    /// Fails with `InsufficientMarketData` when fewer than two runners carry a valid price.
    pub fn from_snapshot(snapshot: &MarketSnapshot, declared_field_size: u32) -> Result<Self, PipelineError> {
        let mut raw = Vec::with_capacity(snapshot.runners.len());
        let mut unpriced = Vec::new();

        for quote in &snapshot.runners {
            match quote.reference_price() {
                Some(price) => raw.push((quote, price, 1.0 / price)),
                None => unpriced.push(quote.runner_id.clone()),
            }
        }

        if raw.len() < 2 {
            return Err(PipelineError::InsufficientMarketData {
                race_id: snapshot.race_id.clone(),
                priced: raw.len(),
            });
        }

        let overround: f64 = raw.iter().map(|(_, _, implied)| implied).sum();
        let entries = raw
            .into_iter()
            .map(|(quote, price, implied)| ImpliedProbability {
                runner_id: quote.runner_id.clone(),
                price,
                probability: implied / overround,
                traded_volume: quote.volume(),
            })
            .collect();

        let field_size = declared_field_size.max(snapshot.runners.len() as u32);

        Ok(Self {
            race_id: snapshot.race_id.clone(),
            entries,
            unpriced,
            overround,
            field_size,
        })
    }

    pub fn race_id(&self) -> &str {
        &self.race_id
    }

    pub fn entries(&self) -> &[ImpliedProbability] {
        &self.entries
    }

    pub fn unpriced(&self) -> &[String] {
        &self.unpriced
    }

    pub fn overround(&self) -> f64 {
        self.overround
    }

    pub fn field_size(&self) -> u32 {
        self.field_size
    }

    pub fn priced_count(&self) -> usize {
        self.entries.len()
    }

    pub fn probability_of(&self, runner_id: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.runner_id == runner_id)
            .map(|e| e.probability)
    }

    pub fn price_of(&self, runner_id: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.runner_id == runner_id)
            .map(|e| e.price)
    }

    /// Priced runners ordered by probability descending, ties by runner_id ascending
    pub fn ranked(&self) -> Vec<&ImpliedProbability> {
        let mut ranked: Vec<&ImpliedProbability> = self.entries.iter().collect();
        ranked.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.runner_id.cmp(&b.runner_id))
        });
        ranked
    }
}
