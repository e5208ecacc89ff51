//! 🎓 Post-race learning
//!
//! Results flow back through a gate that decides whether a race is clean enough
//! to teach the rule library anything. Only COMMITTED races move rule evidence,
//! and each race is settled at most once.

pub mod gate;
pub mod ledger;
pub mod settle;

pub use gate::{LearningGate, Settlement};
pub use ledger::OutcomeLedger;
pub use settle::{settle_results, SettleSummary};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningStatus {
    Committed,
    Quarantined,
    Rejected,
}

impl LearningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStatus::Committed => "COMMITTED",
            LearningStatus::Quarantined => "QUARANTINED",
            LearningStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for LearningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMMITTED" => Ok(LearningStatus::Committed),
            "QUARANTINED" => Ok(LearningStatus::Quarantined),
            "REJECTED" => Ok(LearningStatus::Rejected),
            other => Err(format!("unknown learning status: {}", other)),
        }
    }
}

/// One Beta update applied to a rule, with its parameters afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceUpdate {
    pub rule_id: String,
    pub improved: bool,
    pub alpha: f64,
    pub beta: f64,
    pub evidence_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub race_id: String,
    pub status: LearningStatus,
    pub reason: String,
    #[serde(default)]
    pub updates: Vec<EvidenceUpdate>,
}

impl LearningOutcome {
    pub fn new(race_id: &str, status: LearningStatus, reason: impl Into<String>) -> Self {
        Self {
            race_id: race_id.to_string(),
            status,
            reason: reason.into(),
            updates: Vec::new(),
        }
    }
}
