//! ⚖️ Rule evaluation
//!
//! Matches the active rules of one library snapshot against a race context and
//! freezes each match as a `RuleHit` with its confidence at that moment.

use log::{debug, info};
use std::sync::Arc;

use crate::config::RuleConfig;
use crate::error::RuleStoreError;
use crate::rules::{Rule, RuleHit, RuleLibrary, RuleStore};
use crate::types::{MarketRole, RaceContext};

pub struct RuleEngine {
    store: Arc<RuleStore>,
    config: RuleConfig,
}

impl RuleEngine {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self::with_config(store, RuleConfig::default())
    }

    pub fn with_config(store: Arc<RuleStore>, config: RuleConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Every active rule matching `ctx`, highest confidence first, ties by rule id
    ///
    /// Never fails: malformed rules were excluded when the library loaded.
    pub fn evaluate(&self, ctx: &RaceContext) -> Vec<RuleHit> {
        let library = self.store.snapshot();
        let hits = self.evaluate_with(&library, ctx);

        debug!(
            "⚖️  {}: {} rule hit(s) from library v{} ({} overriding)",
            ctx.race_id,
            hits.len(),
            library.version(),
            hits.iter().filter(|h| h.overriding).count()
        );
        hits
    }

    /// Evaluate against an explicit snapshot
    pub fn evaluate_with(&self, library: &RuleLibrary, ctx: &RaceContext) -> Vec<RuleHit> {
        let mut hits: Vec<RuleHit> = library
            .active()
            .filter(|rule| rule.conditions.matches(ctx))
            .map(|rule| self.hit(rule))
            .collect();

        hits.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        hits
    }

    fn hit(&self, rule: &Rule) -> RuleHit {
        let confidence = rule.confidence();
        RuleHit {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            confidence,
            effect: rule.effect.clone(),
            overriding: self.config.reaches_override(confidence),
            applied: self.config.is_applied(confidence),
        }
    }

    /// Hits that hard-override a WIN on a runner with `candidate_role`
    pub fn overriding_contradictions<'a>(hits: &'a [RuleHit], candidate_role: MarketRole) -> Vec<&'a RuleHit> {
        hits.iter().filter(|h| h.overrides_win(candidate_role)).collect()
    }

    pub fn update_evidence(&self, rule_id: &str, improved: bool) -> Result<Rule, RuleStoreError> {
        let rule = self.store.update_evidence(rule_id, improved)?;
        info!(
            "📚 Rule {} {}: α={} β={} confidence={:.3} (n={})",
            rule.id,
            if improved { "confirmed" } else { "contradicted" },
            rule.alpha,
            rule.beta,
            rule.confidence(),
            rule.evidence_count
        );
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::definition;
    use crate::rules::{Predicate, RuleEffect};

    fn ctx(course: &str) -> RaceContext {
        RaceContext {
            race_id: "R1".to_string(),
            course: course.to_string(),
            distance_furlongs: 8.0,
            going: "good".to_string(),
            field_size: 10,
            class: None,
        }
    }

    fn engine(defs: Vec<crate::rules::RuleDefinition>, config: RuleConfig) -> RuleEngine {
        let (store, _) = RuleStore::from_definitions(defs);
        RuleEngine::with_config(Arc::new(store), config)
    }

    #[test]
    fn test_only_matching_active_rules_hit() {
        let mut york_only = definition("york", RuleEffect::SupportWin, 3.0, 1.0);
        york_only.conditions.course = Predicate::Equals { value: "York".to_string() };
        let mut retired = definition("retired", RuleEffect::SuppressWin, 9.0, 1.0);
        retired.active = false;
        let everywhere = definition("everywhere", RuleEffect::PreferEachWay, 1.0, 1.0);

        let engine = engine(vec![york_only, retired, everywhere], RuleConfig::default());

        let at_york: Vec<String> = engine.evaluate(&ctx("York")).into_iter().map(|h| h.rule_id).collect();
        assert_eq!(at_york, vec!["york".to_string(), "everywhere".to_string()]);

        let at_ascot = engine.evaluate(&ctx("Ascot"));
        assert_eq!(at_ascot.len(), 1);
        assert_eq!(at_ascot[0].rule_id, "everywhere");
    }

    #[test]
    fn test_override_tie_inclusive() {
        // alpha=14, beta=6 → confidence exactly 0.70
        let engine = engine(
            vec![definition("r", RuleEffect::SuppressWin, 14.0, 6.0)],
            RuleConfig::default(),
        );
        let hits = engine.evaluate(&ctx("York"));
        assert!((hits[0].confidence - 0.70).abs() < 1e-12);
        assert!(hits[0].overriding);
        assert_eq!(RuleEngine::overriding_contradictions(&hits, MarketRole::Anchor).len(), 1);
    }

    #[test]
    fn test_override_tie_exclusive() {
        let engine = engine(
            vec![definition("r", RuleEffect::SuppressWin, 14.0, 6.0)],
            RuleConfig {
                override_inclusive: false,
                ..Default::default()
            },
        );
        let hits = engine.evaluate(&ctx("York"));
        assert!(!hits[0].overriding);
        assert!(hits[0].applied);
        assert!(RuleEngine::overriding_contradictions(&hits, MarketRole::Anchor).is_empty());
    }

    #[test]
    fn test_apply_threshold() {
        let engine = engine(
            vec![
                definition("weak", RuleEffect::SupportWin, 1.0, 1.0),
                definition("firm", RuleEffect::SupportWin, 6.0, 4.0),
            ],
            RuleConfig::default(),
        );
        let hits = engine.evaluate(&ctx("York"));
        let weak = hits.iter().find(|h| h.rule_id == "weak").unwrap();
        let firm = hits.iter().find(|h| h.rule_id == "firm").unwrap();
        assert!(!weak.applied);
        assert!(firm.applied);
        assert!(!firm.overriding);
    }

    #[test]
    fn test_fade_role_only_overrides_that_role() {
        let engine = engine(
            vec![definition("fade", RuleEffect::FadeRole { role: MarketRole::Anchor }, 8.0, 2.0)],
            RuleConfig::default(),
        );
        let hits = engine.evaluate(&ctx("York"));
        assert_eq!(RuleEngine::overriding_contradictions(&hits, MarketRole::Anchor).len(), 1);
        assert!(RuleEngine::overriding_contradictions(&hits, MarketRole::Release).is_empty());
    }

    #[test]
    fn test_evidence_moves_confidence() {
        let engine = engine(
            vec![definition("r", RuleEffect::SuppressWin, 13.0, 6.0)],
            RuleConfig::default(),
        );
        assert!(!engine.evaluate(&ctx("York"))[0].overriding);

        engine.update_evidence("r", true).unwrap();
        assert!(engine.evaluate(&ctx("York"))[0].overriding);

        assert!(engine.update_evidence("missing", true).is_err());
    }
}
