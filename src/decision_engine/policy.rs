//! 🎯 Decision Policy
//!
//! Turns the ranking, market roles, rule hits and adversarial finding into a chassis.
//!
//! Order of precedence:
//! 1. Nobody clears the minimum ability/intent → SUPPRESS
//! 2. Adversarial risk at or above the maximum → TOP4_STRUCTURE, win suppressed
//! 3. Overriding SuppressWin / FadeRole against the candidate → TOP4_STRUCTURE, win suppressed
//! 4. Overriding PreferEachWay → VALUE_EW, win suppressed
//! 5. Candidate aligned (ability, intent, not NOISE) → WIN_OVERLAY
//! 6. RELEASE candidate with ability but not intent → VALUE_EW
//! 7. Otherwise TOP4_STRUCTURE

use log::debug;
use std::collections::BTreeSet;

use crate::config::PolicyConfig;
use crate::decision_engine::adversarial::AdversarialFinding;
use crate::decision_engine::ranking::{rank_runners, RankedRunner, Ranking};
use crate::market::RoleAssignment;
use crate::rules::{RuleEffect, RuleHit};
use crate::types::{Chassis, MarketRole, RaceSignals};

/// Everything the policy needs once the candidate has been reviewed
pub struct DecisionInputs<'a> {
    pub race_id: &'a str,
    pub ranking: &'a Ranking,
    pub roles: &'a RoleAssignment,
    pub hits: &'a [RuleHit],
    pub finding: Option<&'a AdversarialFinding>,
}

/// Policy output, before it is stamped with market and audit context
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub chassis: Chassis,
    pub top_selection: Option<String>,
    pub top4: Vec<String>,
    pub fade_list: Vec<String>,
    pub win_suppressed: bool,
    pub adversarial_risk: u32,
    pub reason: String,
}

pub struct DecisionPolicy {
    config: PolicyConfig,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::with_config(PolicyConfig::default())
    }
}

impl DecisionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn rank(&self, signals: &RaceSignals, roles: &RoleAssignment, hits: &[RuleHit]) -> Ranking {
        rank_runners(&self.config, signals, roles, hits)
    }

    /// Runners in a role targeted by an applied FadeRole hit, plus an absorbing
    /// anchor whose ability is below the minimum. Sorted by runner_id.
    pub fn fade_list(&self, ranking: &Ranking, roles: &RoleAssignment, hits: &[RuleHit]) -> Vec<String> {
        let mut fade = BTreeSet::new();

        for hit in hits.iter().filter(|h| h.applied) {
            if let RuleEffect::FadeRole { role } = &hit.effect {
                fade.extend(roles.runners_with_role(*role).into_iter().map(str::to_string));
            }
        }

        if roles.absorbing {
            let weak_anchor = ranking
                .get(&roles.anchor)
                .map(|r| r.ability < self.config.min_ability)
                .unwrap_or(false);
            if weak_anchor {
                fade.insert(roles.anchor.clone());
            }
        }

        fade.into_iter().collect()
    }

    /// Eligible runners outside the fade list, best first, capped at the shortlist size
    pub fn shortlist<'a>(&self, ranking: &'a Ranking, fade_list: &[String]) -> Vec<&'a RankedRunner> {
        ranking
            .eligible()
            .filter(|r| !fade_list.contains(&r.runner_id))
            .take(self.config.shortlist_size)
            .collect()
    }

    /// The runner the adversarial reviewer should attack, if any
    pub fn candidate(&self, ranking: &Ranking, roles: &RoleAssignment, hits: &[RuleHit]) -> Option<String> {
        let fade = self.fade_list(ranking, roles, hits);
        self.shortlist(ranking, &fade).first().map(|r| r.runner_id.clone())
    }

    pub fn decide(&self, inputs: &DecisionInputs<'_>) -> Decision {
        let fade_list = self.fade_list(inputs.ranking, inputs.roles, inputs.hits);
        let shortlist = self.shortlist(inputs.ranking, &fade_list);
        let top4: Vec<String> = shortlist.iter().map(|r| r.runner_id.clone()).collect();

        let candidate = match shortlist.first() {
            Some(candidate) => *candidate,
            None => {
                let reason = if inputs.ranking.eligible().next().is_some() {
                    "every eligible runner is on the fade list".to_string()
                } else {
                    format!(
                        "no runner clears ability ≥ {:.2} and intent ≥ {:.2}",
                        self.config.min_ability, self.config.min_intent
                    )
                };
                return Decision {
                    chassis: Chassis::Suppress,
                    top_selection: None,
                    top4,
                    fade_list,
                    win_suppressed: true,
                    adversarial_risk: inputs.finding.map(|f| f.risk_score).unwrap_or(0),
                    reason,
                };
            }
        };

        let risk = inputs
            .finding
            .filter(|f| f.candidate_runner_id == candidate.runner_id)
            .map(|f| f.risk_score)
            .unwrap_or(0);
        let role = candidate.role;

        let overrides: Vec<&RuleHit> = inputs.hits.iter().filter(|h| h.overrides_win(role)).collect();
        let hard_override = overrides
            .iter()
            .find(|h| matches!(h.effect, RuleEffect::SuppressWin | RuleEffect::FadeRole { .. }));
        let each_way_override = overrides
            .iter()
            .find(|h| matches!(h.effect, RuleEffect::PreferEachWay));

        let has_ability = candidate.ability >= self.config.win_ability_min;
        let has_intent = candidate.intent >= self.config.win_intent_min;
        let win_aligned = has_ability && has_intent && role != MarketRole::Noise;

        let (chassis, win_suppressed, reason) = if risk >= self.config.max_adversarial_risk {
            let modes = inputs.finding.map(|f| f.summary()).unwrap_or_default();
            (
                Chassis::Top4Structure,
                true,
                format!("adversarial risk {} ≥ {} ({})", risk, self.config.max_adversarial_risk, modes),
            )
        } else if let Some(hit) = hard_override {
            (
                Chassis::Top4Structure,
                true,
                format!("rule {} overrides win (confidence {:.3})", hit.rule_id, hit.confidence),
            )
        } else if let Some(hit) = each_way_override {
            (
                Chassis::ValueEw,
                true,
                format!("rule {} prefers each-way (confidence {:.3})", hit.rule_id, hit.confidence),
            )
        } else if win_aligned {
            (
                Chassis::WinOverlay,
                false,
                format!(
                    "{} aligned: ability {:.2}, intent {:.2}, role {}",
                    candidate.runner_id, candidate.ability, candidate.intent, role
                ),
            )
        } else if role == MarketRole::Release && has_ability && !has_intent {
            (
                Chassis::ValueEw,
                false,
                format!(
                    "{} has ability {:.2} but intent {:.2} below {:.2}",
                    candidate.runner_id, candidate.ability, candidate.intent, self.config.win_intent_min
                ),
            )
        } else {
            (Chassis::Top4Structure, false, self.structure_reason(candidate))
        };

        debug!(
            "🎯 {}: {} selection={} risk={} overrides={} fade={:?}",
            inputs.race_id,
            chassis,
            candidate.runner_id,
            risk,
            overrides.len(),
            fade_list
        );

        Decision {
            chassis,
            top_selection: Some(candidate.runner_id.clone()),
            top4,
            fade_list,
            win_suppressed,
            adversarial_risk: risk,
            reason,
        }
    }

    fn structure_reason(&self, candidate: &RankedRunner) -> String {
        if candidate.role == MarketRole::Noise {
            format!("{} is priced as market noise", candidate.runner_id)
        } else if candidate.ability < self.config.win_ability_min {
            format!(
                "{} ability {:.2} below win threshold {:.2}",
                candidate.runner_id, candidate.ability, self.config.win_ability_min
            )
        } else {
            format!(
                "{} intent {:.2} below win threshold {:.2}",
                candidate.runner_id, candidate.intent, self.config.win_intent_min
            )
        }
    }
}
