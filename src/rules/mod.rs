//! 📚 Evidence-tracked rule library
//!
//! Each rule pairs structured race conditions with an effect on the decision.
//! Its confidence is the mean of a Beta(alpha, beta) distribution that only
//! moves through evidence updates from committed race outcomes.

pub mod engine;
pub mod loader;
pub mod predicate;
pub mod store;

pub use engine::RuleEngine;
pub use predicate::{Predicate, RuleConditions};
pub use store::{LoadReport, RuleLibrary, RuleStore};

use serde::{Deserialize, Serialize};

use crate::error::RuleLoadError;
use crate::types::MarketRole;

/// Largest composite score nudge a single rule may apply
const MAX_SCORE_DELTA: f64 = 1.0;

/// What a matching rule does to the decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleEffect {
    SuppressWin,
    PreferEachWay,
    SupportWin,
    FadeRole { role: MarketRole },
    ScoreAdjust { role: MarketRole, delta: f64 },
}

impl RuleEffect {
    /// Whether this effect argues against a WIN bet on a runner with `candidate_role`
    pub fn contradicts_win(&self, candidate_role: MarketRole) -> bool {
        match self {
            RuleEffect::SuppressWin | RuleEffect::PreferEachWay => true,
            RuleEffect::FadeRole { role } => *role == candidate_role,
            RuleEffect::SupportWin | RuleEffect::ScoreAdjust { .. } => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RuleEffect::SuppressWin => "suppress_win",
            RuleEffect::PreferEachWay => "prefer_each_way",
            RuleEffect::SupportWin => "support_win",
            RuleEffect::FadeRole { .. } => "fade_role",
            RuleEffect::ScoreAdjust { .. } => "score_adjust",
        }
    }

    fn validate(&self, rule_id: &str) -> Result<(), RuleLoadError> {
        if let RuleEffect::ScoreAdjust { delta, .. } = self {
            if !delta.is_finite() || *delta == 0.0 || delta.abs() > MAX_SCORE_DELTA {
                return Err(RuleLoadError::InvalidEffect {
                    rule_id: rule_id.to_string(),
                    reason: format!("score delta {} must be non-zero and within ±{}", delta, MAX_SCORE_DELTA),
                });
            }
        }
        Ok(())
    }
}

fn default_prior() -> f64 {
    1.0
}

fn default_active() -> bool {
    true
}

/// Unvalidated rule as it appears in a seed file or a database row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub conditions: RuleConditions,
    pub effect: RuleEffect,
    #[serde(default = "default_prior")]
    pub alpha: f64,
    #[serde(default = "default_prior")]
    pub beta: f64,
    #[serde(default)]
    pub evidence_count: u64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub version: u64,
}

/// A validated rule; only the store hands these out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub conditions: RuleConditions,
    pub effect: RuleEffect,
    pub alpha: f64,
    pub beta: f64,
    pub evidence_count: u64,
    pub active: bool,
    pub version: u64,
}

impl Rule {
    pub fn from_definition(def: RuleDefinition) -> Result<Self, RuleLoadError> {
        if def.id.trim().is_empty() || def.name.trim().is_empty() {
            return Err(RuleLoadError::MissingIdentity);
        }
        if !(def.alpha.is_finite() && def.alpha > 0.0 && def.beta.is_finite() && def.beta > 0.0) {
            return Err(RuleLoadError::InvalidPrior {
                rule_id: def.id,
                alpha: def.alpha,
                beta: def.beta,
            });
        }
        def.conditions.validate(&def.id)?;
        def.effect.validate(&def.id)?;

        Ok(Self {
            id: def.id,
            name: def.name,
            conditions: def.conditions,
            effect: def.effect,
            alpha: def.alpha,
            beta: def.beta,
            evidence_count: def.evidence_count,
            active: def.active,
            version: def.version,
        })
    }

    /// Mean of Beta(alpha, beta)
    pub fn confidence(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn to_definition(&self) -> RuleDefinition {
        RuleDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            conditions: self.conditions.clone(),
            effect: self.effect.clone(),
            alpha: self.alpha,
            beta: self.beta,
            evidence_count: self.evidence_count,
            active: self.active,
            version: self.version,
        }
    }
}

/// A rule that matched a race, frozen at evaluation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleHit {
    pub rule_id: String,
    pub name: String,
    pub confidence: f64,
    pub effect: RuleEffect,
    /// Confidence reached the override threshold when evaluated
    pub overriding: bool,
    /// Confidence reached the apply threshold when evaluated
    pub applied: bool,
}

impl RuleHit {
    /// Hard override against a WIN on a runner with `candidate_role`
    pub fn overrides_win(&self, candidate_role: MarketRole) -> bool {
        self.overriding && self.effect.contradicts_win(candidate_role)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn definition(id: &str, effect: RuleEffect, alpha: f64, beta: f64) -> RuleDefinition {
        RuleDefinition {
            id: id.to_string(),
            name: format!("{} rule", id),
            conditions: RuleConditions::default(),
            effect,
            alpha,
            beta,
            evidence_count: 0,
            active: true,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::definition;
    use super::*;

    #[test]
    fn test_confidence_is_beta_mean() {
        let rule = Rule::from_definition(definition("r1", RuleEffect::SuppressWin, 14.0, 6.0)).unwrap();
        assert!((rule.confidence() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_contradiction_matrix() {
        use MarketRole::*;
        assert!(RuleEffect::SuppressWin.contradicts_win(Release));
        assert!(RuleEffect::PreferEachWay.contradicts_win(Anchor));
        assert!(RuleEffect::FadeRole { role: Anchor }.contradicts_win(Anchor));
        assert!(!RuleEffect::FadeRole { role: Anchor }.contradicts_win(Release));
        assert!(!RuleEffect::SupportWin.contradicts_win(Anchor));
        assert!(!RuleEffect::ScoreAdjust { role: Anchor, delta: -0.1 }.contradicts_win(Anchor));
    }

    #[test]
    fn test_invalid_prior_rejected() {
        for (alpha, beta) in [(0.0, 1.0), (1.0, -2.0), (f64::INFINITY, 1.0)] {
            let err = Rule::from_definition(definition("r", RuleEffect::SupportWin, alpha, beta)).unwrap_err();
            assert!(matches!(err, RuleLoadError::InvalidPrior { .. }));
        }
    }

    #[test]
    fn test_invalid_score_delta_rejected() {
        let effect = RuleEffect::ScoreAdjust { role: MarketRole::Noise, delta: 0.0 };
        let err = Rule::from_definition(definition("r", effect, 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, RuleLoadError::InvalidEffect { .. }));
    }

    #[test]
    fn test_missing_identity_rejected() {
        let mut def = definition("r", RuleEffect::SupportWin, 1.0, 1.0);
        def.name = "  ".to_string();
        assert_eq!(Rule::from_definition(def).unwrap_err(), RuleLoadError::MissingIdentity);
    }

    #[test]
    fn test_effect_toml_shape() {
        #[derive(Deserialize)]
        struct Wrapper {
            effect: RuleEffect,
        }
        let parsed: Wrapper = toml::from_str(r#"effect = { kind = "fade_role", role = "ANCHOR" }"#).unwrap();
        assert_eq!(parsed.effect, RuleEffect::FadeRole { role: MarketRole::Anchor });
    }
}
