//! 🚦 Learning Gate
//!
//! Screens each (verdict, result) pair before it may touch rule evidence:
//! - REJECTED: wrong race, void or empty result, manipulation confirmed after the off
//! - QUARANTINED: stewards' amendment, stale decision inputs, conflicting rules,
//!   selection price moved too far before the off
//! - COMMITTED: everything else; only these update rules

use log::{info, warn};
use std::sync::Arc;

use crate::config::LearningConfig;
use crate::decision_engine::{FailureMode, Verdict};
use crate::learning::{EvidenceUpdate, LearningOutcome, LearningStatus, OutcomeLedger};
use crate::metrics;
use crate::rules::{RuleEffect, RuleHit, RuleStore};
use crate::types::{is_valid_price, RaceResult};

/// Outcome of a settle call
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub outcome: LearningOutcome,
    /// False when the race had already been settled and nothing changed
    pub newly_recorded: bool,
}

pub struct LearningGate {
    config: LearningConfig,
    store: Arc<RuleStore>,
    ledger: OutcomeLedger,
}

impl LearningGate {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self::with_config(store, LearningConfig::default(), OutcomeLedger::new())
    }

    pub fn with_config(store: Arc<RuleStore>, config: LearningConfig, ledger: OutcomeLedger) -> Self {
        Self { config, store, ledger }
    }

    pub fn ledger(&self) -> &OutcomeLedger {
        &self.ledger
    }

    pub fn evaluate(&self, verdict: &Verdict, result: &RaceResult) -> LearningOutcome {
        self.settle(verdict, result).outcome
    }

    /// Screen, and for COMMITTED races apply rule evidence, at most once per race
    pub fn settle(&self, verdict: &Verdict, result: &RaceResult) -> Settlement {
        let (outcome, newly_recorded) = self.ledger.settle_once(&verdict.race_id, || {
            let mut outcome = self.screen(verdict, result);
            if outcome.status == LearningStatus::Committed {
                outcome.updates = self.apply_evidence(verdict, result);
            }
            metrics::record_learning_outcome(outcome.status);
            outcome
        });

        if newly_recorded {
            info!(
                "🚦 {}: {} ({}) | {} rule update(s)",
                outcome.race_id,
                outcome.status,
                outcome.reason,
                outcome.updates.len()
            );
        } else {
            info!("🚦 {}: already settled as {}, nothing changed", outcome.race_id, outcome.status);
        }

        Settlement { outcome, newly_recorded }
    }

    /// Status and reason only; no side effects
    pub fn screen(&self, verdict: &Verdict, result: &RaceResult) -> LearningOutcome {
        let race_id = verdict.race_id.as_str();
        let rejected = |reason: String| LearningOutcome::new(race_id, LearningStatus::Rejected, reason);
        let quarantined = |reason: String| LearningOutcome::new(race_id, LearningStatus::Quarantined, reason);

        if result.race_id != verdict.race_id {
            return rejected(format!("result is for race {}", result.race_id));
        }
        if result.void {
            return rejected("race declared void".to_string());
        }
        if result.finishing_order.is_empty() {
            return rejected("no finishing order".to_string());
        }
        let flagged_before_off = verdict
            .adversarial
            .as_ref()
            .map(|f| f.has(FailureMode::ManipulationRisk))
            .unwrap_or(false);
        if let Some(post_race) = result.post_race_manipulation_risk {
            if flagged_before_off && post_race > self.config.manipulation_tolerance {
                return rejected(format!(
                    "manipulation flagged pre-race and post-race risk {:.2} > {:.2}",
                    post_race, self.config.manipulation_tolerance
                ));
            }
        }

        if result.result_amended {
            return quarantined("result amended by stewards".to_string());
        }
        if verdict.stale_inputs {
            return quarantined("verdict built from stale inputs".to_string());
        }
        if let Some((support, against)) = conflicting_hits(&verdict.rule_hits) {
            return quarantined(format!("conflicting rules {} and {}", support, against));
        }
        if let Some(drift) = self.price_drift(verdict, result) {
            if drift > self.config.max_price_drift {
                return quarantined(format!(
                    "selection price drift |ln(SP/price)| = {:.3} > {:.3}",
                    drift, self.config.max_price_drift
                ));
            }
        }

        LearningOutcome::new(race_id, LearningStatus::Committed, "clean result")
    }

    /// |ln(SP / decision price)| of the selection, when both prices are known
    fn price_drift(&self, verdict: &Verdict, result: &RaceResult) -> Option<f64> {
        let selection = verdict.top_selection.as_deref()?;
        let decision_price = verdict.selection_price.filter(|p| is_valid_price(*p))?;
        let starting_price = result
            .starting_prices
            .get(selection)
            .copied()
            .filter(|p| is_valid_price(*p))?;
        Some((starting_price / decision_price).ln().abs())
    }

    fn apply_evidence(&self, verdict: &Verdict, result: &RaceResult) -> Vec<EvidenceUpdate> {
        let mut updates = Vec::new();

        for hit in &verdict.rule_hits {
            let Some(improved) = self.improved(hit, verdict, result) else {
                continue;
            };
            match self.store.update_evidence(&hit.rule_id, improved) {
                Ok(rule) => {
                    metrics::record_evidence_update(improved);
                    updates.push(EvidenceUpdate {
                        rule_id: rule.id,
                        improved,
                        alpha: rule.alpha,
                        beta: rule.beta,
                        evidence_count: rule.evidence_count,
                    });
                }
                Err(e) => warn!("⚠️  {}: skipping evidence for {}: {}", verdict.race_id, hit.rule_id, e),
            }
        }

        updates
    }

    /// Whether following the rule's advice would have helped in this race
    ///
    /// None when the rule's direction cannot be judged.
    pub fn improved(&self, hit: &RuleHit, verdict: &Verdict, result: &RaceResult) -> Option<bool> {
        let placed = |runner: &str| {
            result
                .position_of(runner)
                .map(|pos| pos <= self.config.place_positions)
                .unwrap_or(false)
        };
        let reference = verdict.top_selection.as_deref().or(verdict.anchor.as_deref());
        let winner = result.winner();

        match &hit.effect {
            RuleEffect::SuppressWin => reference.map(|r| winner != Some(r)),
            RuleEffect::PreferEachWay => reference.map(|r| winner != Some(r) && placed(r)),
            RuleEffect::SupportWin => reference.map(|r| winner == Some(r)),
            RuleEffect::FadeRole { role } => {
                let runners = verdict.runners_with_role(*role);
                if runners.is_empty() {
                    return None;
                }
                Some(!runners.iter().any(|r| placed(r)))
            }
            RuleEffect::ScoreAdjust { role, delta } => {
                let runners = verdict.runners_with_role(*role);
                if runners.is_empty() {
                    return None;
                }
                let any_placed = runners.iter().any(|r| placed(r));
                Some((*delta > 0.0) == any_placed)
            }
        }
    }
}

/// First applied SupportWin paired with an applied SuppressWin or PreferEachWay
fn conflicting_hits(hits: &[RuleHit]) -> Option<(&str, &str)> {
    let support = hits
        .iter()
        .find(|h| h.applied && matches!(h.effect, RuleEffect::SupportWin))?;
    let against = hits
        .iter()
        .find(|h| h.applied && matches!(h.effect, RuleEffect::SuppressWin | RuleEffect::PreferEachWay))?;
    Some((support.rule_id.as_str(), against.rule_id.as_str()))
}
