//! 🏁 Composite ranking of runners
//!
//! Score = w_ability·ability + w_intent·intent + w_behavioral·behavioral
//!       + w_market·p_market + role weight + Σ applied score adjustments,
//! rounded to a fixed number of decimals so ordering is stable.

use log::warn;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::{CompositeWeights, PolicyConfig, TieBreak};
use crate::market::RoleAssignment;
use crate::rules::{RuleEffect, RuleHit};
use crate::types::{MarketRole, RaceSignals};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRunner {
    pub runner_id: String,
    pub composite: f64,
    pub role: MarketRole,
    pub market_probability: f64,
    pub ability: f64,
    pub intent: f64,
    /// Clears the minimum ability and intent thresholds
    pub eligible: bool,
}

/// Runners with valid signals in composite order
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub runners: Vec<RankedRunner>,
    /// Runners whose signal was out of range
    pub invalid_signals: Vec<String>,
}

impl Ranking {
    pub fn get(&self, runner_id: &str) -> Option<&RankedRunner> {
        self.runners.iter().find(|r| r.runner_id == runner_id)
    }

    pub fn eligible(&self) -> impl Iterator<Item = &RankedRunner> {
        self.runners.iter().filter(|r| r.eligible)
    }
}

fn role_weight(weights: &CompositeWeights, role: MarketRole) -> f64 {
    match role {
        MarketRole::Anchor => weights.anchor,
        MarketRole::Release => weights.release,
        MarketRole::Noise => weights.noise,
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Sum of applied `ScoreAdjust` deltas targeting `role`
fn score_adjustment(hits: &[RuleHit], role: MarketRole) -> f64 {
    hits.iter()
        .filter(|h| h.applied)
        .filter_map(|h| match &h.effect {
            RuleEffect::ScoreAdjust { role: target, delta } if *target == role => Some(*delta),
            _ => None,
        })
        .sum()
}

fn compare(a: &RankedRunner, b: &RankedRunner, tie_break: TieBreak) -> Ordering {
    let by_score = b.composite.total_cmp(&a.composite);
    let by_market = match tie_break {
        TieBreak::RunnerId => Ordering::Equal,
        TieBreak::MarketThenRunnerId => b.market_probability.total_cmp(&a.market_probability),
    };
    by_score
        .then(by_market)
        .then_with(|| a.runner_id.cmp(&b.runner_id))
}

/// Score and order every runner with a valid signal
///
/// The result depends only on the set of inputs, never on their order.
pub fn rank_runners(
    config: &PolicyConfig,
    signals: &RaceSignals,
    roles: &RoleAssignment,
    hits: &[RuleHit],
) -> Ranking {
    let mut ranking = Ranking::default();

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for signal in &signals.runners {
        *seen.entry(signal.runner_id.as_str()).or_default() += 1;
    }

    for signal in &signals.runners {
        if seen[signal.runner_id.as_str()] > 1 {
            if !ranking.invalid_signals.contains(&signal.runner_id) {
                warn!(
                    "⚠️  {}: conflicting signals for runner {}, excluded from ranking",
                    roles.race_id, signal.runner_id
                );
                ranking.invalid_signals.push(signal.runner_id.clone());
            }
            continue;
        }
        if !signal.is_in_range() {
            warn!(
                "⚠️  {}: signal for runner {} out of range, excluded from ranking",
                roles.race_id, signal.runner_id
            );
            ranking.invalid_signals.push(signal.runner_id.clone());
            continue;
        }

        let role = roles.role_of(&signal.runner_id);
        let market_probability = roles.probability_of(&signal.runner_id).unwrap_or(0.0);
        let w = &config.weights;

        let raw = w.ability * signal.ability
            + w.intent * signal.intent
            + w.behavioral * signal.behavioral
            + w.market * market_probability
            + role_weight(w, role)
            + score_adjustment(hits, role);

        ranking.runners.push(RankedRunner {
            runner_id: signal.runner_id.clone(),
            composite: round_to(raw, config.score_decimals),
            role,
            market_probability,
            ability: signal.ability,
            intent: signal.intent,
            eligible: signal.ability >= config.min_ability && signal.intent >= config.min_intent,
        });
    }

    ranking.runners.sort_by(|a, b| compare(a, b, config.tie_break));
    ranking.invalid_signals.sort();
    ranking
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::test_support::snapshot_from_probabilities;
    use crate::market::{MarketBook, MarketRoleClassifier};
    use crate::types::RunnerSignal;
    use chrono::{TimeZone, Utc};

    fn signal(id: &str, ability: f64, intent: f64, behavioral: f64) -> RunnerSignal {
        RunnerSignal {
            runner_id: id.to_string(),
            ability,
            intent,
            behavioral,
            pace_uncertain: false,
            trip_risk: 0.0,
        }
    }

    fn roles() -> RoleAssignment {
        let snapshot = snapshot_from_probabilities("R1", &[("a", 0.4), ("b", 0.3), ("c", 0.2), ("d", 0.1)]);
        let book = MarketBook::from_snapshot(&snapshot, 4).unwrap();
        MarketRoleClassifier::new().classify(&book)
    }

    fn race_signals(runners: Vec<RunnerSignal>) -> RaceSignals {
        RaceSignals {
            produced_at: Utc.with_ymd_and_hms(2026, 6, 1, 13, 0, 0).unwrap(),
            runners,
            manipulation_risk: 0.0,
        }
    }

    fn order(ranking: &Ranking) -> Vec<&str> {
        ranking.runners.iter().map(|r| r.runner_id.as_str()).collect()
    }

    #[test]
    fn test_order_independent_of_input_order() {
        let runners = vec![
            signal("a", 0.7, 0.6, 0.5),
            signal("b", 0.8, 0.7, 0.4),
            signal("c", 0.5, 0.5, 0.5),
            signal("d", 0.6, 0.6, 0.6),
            signal("e", 0.6, 0.6, 0.6),
        ];
        let config = PolicyConfig::default();
        let roles = roles();

        let forward = rank_runners(&config, &race_signals(runners.clone()), &roles, &[]);
        let mut reversed_input = runners.clone();
        reversed_input.reverse();
        let reversed = rank_runners(&config, &race_signals(reversed_input), &roles, &[]);
        let mut rotated_input = runners;
        rotated_input.rotate_left(2);
        let rotated = rank_runners(&config, &race_signals(rotated_input), &roles, &[]);

        assert_eq!(forward.runners, reversed.runners);
        assert_eq!(forward.runners, rotated.runners);
    }

    #[test]
    fn test_equal_scores_break_by_runner_id() {
        // Identical signals, both unpriced NOISE
        let snapshot = snapshot_from_probabilities("R1", &[("fav", 0.6), ("other", 0.4)]);
        let book = MarketBook::from_snapshot(&snapshot, 2).unwrap();
        let roles = MarketRoleClassifier::new().classify(&book);

        let ranking = rank_runners(
            &PolicyConfig::default(),
            &race_signals(vec![signal("zulu", 0.5, 0.5, 0.5), signal("alpha", 0.5, 0.5, 0.5)]),
            &roles,
            &[],
        );
        assert_eq!(order(&ranking), vec!["alpha", "zulu"]);
        assert_eq!(ranking.runners[0].composite, ranking.runners[1].composite);
    }

    #[test]
    fn test_market_then_runner_id_tie_break() {
        let config = PolicyConfig {
            tie_break: TieBreak::MarketThenRunnerId,
            weights: CompositeWeights {
                market: 0.0,
                anchor: 0.0,
                release: 0.0,
                noise: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        // Favourite sorts last by id
        let snapshot = snapshot_from_probabilities("R1", &[("zed", 0.6), ("abe", 0.4)]);
        let book = MarketBook::from_snapshot(&snapshot, 2).unwrap();
        let roles = MarketRoleClassifier::new().classify(&book);
        let signals = race_signals(vec![signal("abe", 0.5, 0.5, 0.5), signal("zed", 0.5, 0.5, 0.5)]);

        let by_market = rank_runners(&config, &signals, &roles, &[]);
        assert_eq!(by_market.runners[0].composite, by_market.runners[1].composite);
        assert_eq!(order(&by_market), vec!["zed", "abe"]);

        let by_id = rank_runners(
            &PolicyConfig { tie_break: TieBreak::RunnerId, ..config.clone() },
            &signals,
            &roles,
            &[],
        );
        assert_eq!(order(&by_id), vec!["abe", "zed"]);
    }

    #[test]
    fn test_invalid_signals_excluded() {
        let ranking = rank_runners(
            &PolicyConfig::default(),
            &race_signals(vec![signal("a", 0.7, 0.7, 0.7), signal("b", 1.4, 0.7, 0.7)]),
            &roles(),
            &[],
        );
        assert_eq!(order(&ranking), vec!["a"]);
        assert_eq!(ranking.invalid_signals, vec!["b".to_string()]);
    }

    #[test]
    fn test_conflicting_signals_rejected_regardless_of_order() {
        let config = PolicyConfig::default();
        let roles = roles();
        let strong_first = race_signals(vec![
            signal("a", 0.7, 0.7, 0.7),
            signal("b", 0.9, 0.9, 0.9),
            signal("b", 0.1, 0.1, 0.1),
        ]);
        let weak_first = race_signals(vec![
            signal("b", 0.1, 0.1, 0.1),
            signal("a", 0.7, 0.7, 0.7),
            signal("b", 0.9, 0.9, 0.9),
        ]);

        let first = rank_runners(&config, &strong_first, &roles, &[]);
        let second = rank_runners(&config, &weak_first, &roles, &[]);

        assert_eq!(first.runners, second.runners);
        assert_eq!(order(&first), vec!["a"]);
        assert_eq!(first.invalid_signals, vec!["b".to_string()]);
        assert_eq!(second.invalid_signals, vec!["b".to_string()]);
    }

    #[test]
    fn test_eligibility() {
        let ranking = rank_runners(
            &PolicyConfig::default(),
            &race_signals(vec![signal("a", 0.39, 0.9, 0.5), signal("b", 0.4, 0.4, 0.0)]),
            &roles(),
            &[],
        );
        assert!(!ranking.get("a").unwrap().eligible);
        assert!(ranking.get("b").unwrap().eligible);
    }

    #[test]
    fn test_applied_score_adjust_moves_role() {
        let hit = |applied: bool| RuleHit {
            rule_id: "lift-noise".to_string(),
            name: "lift noise".to_string(),
            confidence: if applied { 0.6 } else { 0.5 },
            effect: RuleEffect::ScoreAdjust { role: MarketRole::Noise, delta: 0.2 },
            overriding: false,
            applied,
        };
        let signals = race_signals(vec![signal("a", 0.6, 0.6, 0.6), signal("d", 0.6, 0.6, 0.6)]);
        let config = PolicyConfig::default();

        let plain = rank_runners(&config, &signals, &roles(), &[hit(false)]);
        assert_eq!(order(&plain), vec!["a", "d"]);

        let lifted = rank_runners(&config, &signals, &roles(), &[hit(true)]);
        assert_eq!(order(&lifted), vec!["d", "a"]);
    }

    #[test]
    fn test_composite_rounding() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(0.5, 0), 1.0);
    }
}
