//! 🔴 Adversarial Review
//!
//! Red-teams the candidate selection before any bet is recommended.
//! Each failure mode that applies adds one to the risk score.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::config::AdversarialConfig;
use crate::market::{ChaosResult, RoleAssignment};
use crate::types::{MarketRole, RaceSignals};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureMode {
    /// Candidate is the anchor and the market is pouring money into it
    ExpensiveFavourite,
    HighChaos,
    PaceUncertain,
    TripRisk,
    /// Race-level manipulation signal before the off
    ManipulationRisk,
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::ExpensiveFavourite => "EXPENSIVE_FAVOURITE",
            FailureMode::HighChaos => "HIGH_CHAOS",
            FailureMode::PaceUncertain => "PACE_UNCERTAIN",
            FailureMode::TripRisk => "TRIP_RISK",
            FailureMode::ManipulationRisk => "MANIPULATION_RISK",
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdversarialFinding {
    pub candidate_runner_id: String,
    pub failure_modes: BTreeSet<FailureMode>,
    /// Always the number of failure modes
    pub risk_score: u32,
}

impl AdversarialFinding {
    pub fn has(&self, mode: FailureMode) -> bool {
        self.failure_modes.contains(&mode)
    }

    pub fn summary(&self) -> String {
        if self.failure_modes.is_empty() {
            return "none".to_string();
        }
        self.failure_modes
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }
}

pub struct AdversarialReviewer {
    config: AdversarialConfig,
}

impl Default for AdversarialReviewer {
    fn default() -> Self {
        Self::with_config(AdversarialConfig::default())
    }
}

impl AdversarialReviewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AdversarialConfig) -> Self {
        Self { config }
    }

    /// Check every failure mode against the candidate; never fails
    ///
    /// A candidate without a signal can only trip the race-level checks.
    pub fn review(
        &self,
        candidate: &str,
        roles: &RoleAssignment,
        chaos: &ChaosResult,
        signals: &RaceSignals,
    ) -> AdversarialFinding {
        let mut modes = BTreeSet::new();

        if roles.role_of(candidate) == MarketRole::Anchor && roles.absorbing {
            modes.insert(FailureMode::ExpensiveFavourite);
        }
        if chaos.chaos_level >= self.config.high_chaos_threshold {
            modes.insert(FailureMode::HighChaos);
        }
        if let Some(signal) = signals.get(candidate) {
            if signal.pace_uncertain {
                modes.insert(FailureMode::PaceUncertain);
            }
            if signal.trip_risk >= self.config.trip_risk_threshold {
                modes.insert(FailureMode::TripRisk);
            }
        }
        if signals.manipulation_risk >= self.config.manipulation_threshold {
            modes.insert(FailureMode::ManipulationRisk);
        }

        let finding = AdversarialFinding {
            candidate_runner_id: candidate.to_string(),
            risk_score: modes.len() as u32,
            failure_modes: modes,
        };

        debug!(
            "🔴 {}: candidate {} risk={} [{}]",
            roles.race_id,
            candidate,
            finding.risk_score,
            finding.summary()
        );
        finding
    }
}
