//! ⚠️ Error taxonomy for the race pipeline and the rule library

use thiserror::Error;

/// Failures of a single race's pipeline run
///
/// Only `InsufficientMarketData` and `MalformedRaceContext` abort a run.
/// `StaleSignal` is turned into a SUPPRESS verdict by the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Insufficient market data for race {race_id}: {priced} priced runner(s), need at least 2")]
    InsufficientMarketData { race_id: String, priced: usize },

    #[error("Malformed race context {race_id}: {reason}")]
    MalformedRaceContext { race_id: String, reason: String },

    #[error("Stale input for race {race_id}: {reason}")]
    StaleSignal { race_id: String, reason: String },
}

impl PipelineError {
    pub fn race_id(&self) -> &str {
        match self {
            PipelineError::InsufficientMarketData { race_id, .. } => race_id,
            PipelineError::MalformedRaceContext { race_id, .. } => race_id,
            PipelineError::StaleSignal { race_id, .. } => race_id,
        }
    }

    /// Whether the run ends without a verdict
    pub fn is_abort(&self) -> bool {
        !matches!(self, PipelineError::StaleSignal { .. })
    }
}

/// A rule definition that cannot enter the active set
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleLoadError {
    #[error("Rule {rule_id}: {field} predicate is invalid: {reason}")]
    InvalidCondition {
        rule_id: String,
        field: &'static str,
        reason: String,
    },

    #[error("Rule {rule_id}: invalid effect: {reason}")]
    InvalidEffect { rule_id: String, reason: String },

    #[error("Rule {rule_id}: Beta parameters must be positive and finite (alpha={alpha}, beta={beta})")]
    InvalidPrior { rule_id: String, alpha: f64, beta: f64 },

    #[error("Rule with empty id or name")]
    MissingIdentity,

    #[error("Rule {rule_id} is defined more than once")]
    DuplicateId { rule_id: String },

    #[error("Rule entry {entry} could not be parsed: {reason}")]
    Unparseable { entry: String, reason: String },
}

/// Failures of rule library mutations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleStoreError {
    #[error("Unknown rule: {0}")]
    UnknownRule(String),
}
