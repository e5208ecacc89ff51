//! The immutable per-race decision record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::decision_engine::adversarial::AdversarialFinding;
use crate::market::ChaosResult;
use crate::rules::RuleHit;
use crate::types::{Chassis, MarketRole};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub race_id: String,
    pub chassis: Chassis,
    pub top_selection: Option<String>,
    pub top4: Vec<String>,
    pub fade_list: Vec<String>,
    pub win_suppressed: bool,
    pub rule_hits: Vec<RuleHit>,
    pub adversarial_risk: u32,
    pub reason: String,
    pub adversarial: Option<AdversarialFinding>,
    pub chaos: Option<ChaosResult>,
    pub market_roles: BTreeMap<String, MarketRole>,
    pub anchor: Option<String>,
    /// Reference price of the selection in the decision snapshot
    pub selection_price: Option<f64>,
    pub snapshot_at: Option<DateTime<Utc>>,
    pub decided_at: DateTime<Utc>,
    /// Built from missing or out-of-date inputs
    pub stale_inputs: bool,
    pub rule_library_version: u64,
}

impl Verdict {
    /// "No recommendation" verdict
    pub fn suppressed(race_id: &str, reason: impl Into<String>, decided_at: DateTime<Utc>) -> Self {
        Self {
            race_id: race_id.to_string(),
            chassis: Chassis::Suppress,
            top_selection: None,
            top4: Vec::new(),
            fade_list: Vec::new(),
            win_suppressed: true,
            rule_hits: Vec::new(),
            adversarial_risk: 0,
            reason: reason.into(),
            adversarial: None,
            chaos: None,
            market_roles: BTreeMap::new(),
            anchor: None,
            selection_price: None,
            snapshot_at: None,
            decided_at,
            stale_inputs: false,
            rule_library_version: 0,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.chassis == Chassis::Suppress
    }

    pub fn role_of(&self, runner_id: &str) -> MarketRole {
        self.market_roles.get(runner_id).copied().unwrap_or(MarketRole::Noise)
    }

    pub fn runners_with_role(&self, role: MarketRole) -> Vec<&str> {
        self.market_roles
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
