//! 🏇 Per-race pipeline
//!
//! context check → freshness → book → chaos + roles → rule hits → ranking
//! → adversarial review of the candidate → policy → verdict.
//!
//! Each run is a pure function of its inputs and one rule library snapshot;
//! the decision time comes in with the inputs, nothing reads the clock.

use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, PipelineConfig};
use crate::decision_engine::adversarial::AdversarialReviewer;
use crate::decision_engine::policy::{DecisionInputs, DecisionPolicy};
use crate::decision_engine::verdict::Verdict;
use crate::error::PipelineError;
use crate::market::{ConcentrationClassifier, MarketBook, MarketRoleClassifier};
use crate::metrics;
use crate::rules::{RuleEngine, RuleStore};
use crate::types::{MarketSnapshot, RaceInputs, RaceSignals};

pub struct RacePipeline {
    concentration: ConcentrationClassifier,
    roles: MarketRoleClassifier,
    rules: RuleEngine,
    reviewer: AdversarialReviewer,
    policy: DecisionPolicy,
    config: PipelineConfig,
}

impl RacePipeline {
    pub fn new(config: &Config, store: Arc<RuleStore>) -> Self {
        Self {
            concentration: ConcentrationClassifier::with_config(config.chaos.clone()),
            roles: MarketRoleClassifier::with_config(config.roles.clone()),
            rules: RuleEngine::with_config(store, config.rules.clone()),
            reviewer: AdversarialReviewer::with_config(config.adversarial.clone()),
            policy: DecisionPolicy::with_config(config.policy.clone()),
            config: config.pipeline.clone(),
        }
    }

    /// Decide one race
    ///
    /// `InsufficientMarketData` and `MalformedRaceContext` end the run without a verdict;
    /// missing or stale inputs produce a SUPPRESS verdict.
    pub fn run(&self, inputs: &RaceInputs) -> Result<Verdict, PipelineError> {
        let started = Instant::now();
        let race_id = inputs.context.race_id.as_str();

        let outcome = self.decide(inputs);
        match &outcome {
            Ok(verdict) => {
                metrics::record_verdict(verdict.chassis, verdict.win_suppressed, verdict.stale_inputs, started.elapsed());
                info!(
                    "🏁 {}: {} selection={} top4=[{}] risk={} hits={} | {}",
                    race_id,
                    verdict.chassis,
                    verdict.top_selection.as_deref().unwrap_or("-"),
                    verdict.top4.join(", "),
                    verdict.adversarial_risk,
                    verdict.rule_hits.len(),
                    verdict.reason
                );
            }
            Err(e) => {
                metrics::record_abort(e);
                error!("❌ {}: pipeline aborted: {}", race_id, e);
            }
        }
        outcome
    }

    fn decide(&self, inputs: &RaceInputs) -> Result<Verdict, PipelineError> {
        let ctx = &inputs.context;
        ctx.validate()?;

        let library = self.rules.store().snapshot();

        let (snapshot, signals) = match self.fresh_inputs(inputs) {
            Ok(fresh) => fresh,
            Err(e @ PipelineError::StaleSignal { .. }) => {
                warn!("⏳ {}: {}, suppressing", ctx.race_id, e);
                let mut verdict = Verdict::suppressed(&ctx.race_id, e.to_string(), inputs.decision_time);
                verdict.stale_inputs = true;
                verdict.rule_library_version = library.version();
                verdict.snapshot_at = inputs.snapshot.as_ref().map(|s| s.captured_at);
                return Ok(verdict);
            }
            Err(e) => return Err(e),
        };

        let book = MarketBook::from_snapshot(snapshot, ctx.field_size)?;
        let chaos = self.concentration.classify(&book);
        let roles = self.roles.classify(&book);
        let hits = self.rules.evaluate_with(&library, ctx);

        let ranking = self.policy.rank(signals, &roles, &hits);
        let finding = self
            .policy
            .candidate(&ranking, &roles, &hits)
            .map(|candidate| self.reviewer.review(&candidate, &roles, &chaos, signals));

        let decision = self.policy.decide(&DecisionInputs {
            race_id: &ctx.race_id,
            ranking: &ranking,
            roles: &roles,
            hits: &hits,
            finding: finding.as_ref(),
        });

        let selection_price = decision
            .top_selection
            .as_deref()
            .and_then(|id| book.price_of(id));

        Ok(Verdict {
            race_id: ctx.race_id.clone(),
            chassis: decision.chassis,
            top_selection: decision.top_selection,
            top4: decision.top4,
            fade_list: decision.fade_list,
            win_suppressed: decision.win_suppressed,
            rule_hits: hits,
            adversarial_risk: decision.adversarial_risk,
            reason: decision.reason,
            adversarial: finding,
            market_roles: roles
                .entries
                .iter()
                .map(|e| (e.runner_id.clone(), e.role))
                .collect(),
            anchor: Some(roles.anchor.clone()),
            chaos: Some(chaos),
            selection_price,
            snapshot_at: Some(snapshot.captured_at),
            decided_at: inputs.decision_time,
            stale_inputs: false,
            rule_library_version: library.version(),
        })
    }

    /// Snapshot and signals, both present, for this race and not older than allowed
    fn fresh_inputs<'a>(&self, inputs: &'a RaceInputs) -> Result<(&'a MarketSnapshot, &'a RaceSignals), PipelineError> {
        let race_id = &inputs.context.race_id;
        let stale = |reason: String| PipelineError::StaleSignal {
            race_id: race_id.clone(),
            reason,
        };

        let snapshot = inputs
            .snapshot
            .as_ref()
            .ok_or_else(|| stale("no market snapshot".to_string()))?;
        if &snapshot.race_id != race_id {
            return Err(PipelineError::MalformedRaceContext {
                race_id: race_id.clone(),
                reason: format!("snapshot belongs to race {}", snapshot.race_id),
            });
        }

        let snapshot_age = (inputs.decision_time - snapshot.captured_at).num_seconds();
        if snapshot_age < 0 {
            return Err(stale("market snapshot captured after decision time".to_string()));
        }
        if snapshot_age > self.config.max_snapshot_age_secs {
            return Err(stale(format!(
                "market snapshot is {}s old (max {}s)",
                snapshot_age, self.config.max_snapshot_age_secs
            )));
        }

        let signals = inputs
            .signals
            .as_ref()
            .ok_or_else(|| stale("no runner signals".to_string()))?;
        let signal_age = (inputs.decision_time - signals.produced_at).num_seconds();
        if signal_age < 0 {
            return Err(stale("signals produced after decision time".to_string()));
        }
        if signal_age > self.config.max_signal_age_secs {
            return Err(stale(format!(
                "signals are {}s old (max {}s)",
                signal_age, self.config.max_signal_age_secs
            )));
        }

        Ok((snapshot, signals))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::market::test_support::snapshot_from_probabilities;
    use crate::types::{RaceContext, RunnerSignal};
    use chrono::Duration;

    pub fn signal(id: &str, ability: f64, intent: f64) -> RunnerSignal {
        RunnerSignal {
            runner_id: id.to_string(),
            ability,
            intent,
            behavioral: 0.5,
            pace_uncertain: false,
            trip_risk: 0.0,
        }
    }

    /// Five-runner sprint at Ascot with a clear, well-backed favourite "a"
    pub fn race_inputs(race_id: &str) -> RaceInputs {
        let snapshot = snapshot_from_probabilities(
            race_id,
            &[("a", 0.40), ("b", 0.25), ("c", 0.15), ("d", 0.10), ("e", 0.10)],
        );
        let decision_time = snapshot.captured_at + Duration::seconds(60);

        RaceInputs {
            context: RaceContext {
                race_id: race_id.to_string(),
                course: "Ascot".to_string(),
                distance_furlongs: 6.0,
                going: "Good".to_string(),
                field_size: 5,
                class: None,
            },
            signals: Some(RaceSignals {
                produced_at: decision_time - Duration::seconds(600),
                runners: vec![
                    signal("a", 0.85, 0.80),
                    signal("b", 0.65, 0.60),
                    signal("c", 0.55, 0.50),
                    signal("d", 0.50, 0.45),
                    signal("e", 0.30, 0.30),
                ],
                manipulation_risk: 0.0,
            }),
            snapshot: Some(snapshot),
            decision_time,
        }
    }
}
