//! Configuration management for the verdict engine
//!
//! Every threshold, window and weight used by the pipeline lives here so it can be
//! tuned without touching the decision logic. Loaded from a TOML file; missing
//! sections and fields fall back to the defaults below.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::types::ChaosMode;

pub const DEFAULT_CONFIG_PATH: &str = "verdict_engine.toml";
pub const EXAMPLE_CONFIG_PATH: &str = "verdict_engine.example.toml";

/// Complete configuration for the verdict engine
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub chaos: ChaosConfig,
    pub roles: RoleConfig,
    pub rules: RuleConfig,
    pub adversarial: AdversarialConfig,
    pub policy: PolicyConfig,
    pub learning: LearningConfig,
    pub pipeline: PipelineConfig,
    pub database: DatabaseConfig,
    pub monitoring: MonitoringConfig,
}

/// Chaos score combination and mode thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChaosConfig {
    /// chaos < structure_max → STRUCTURE
    pub structure_max: f64,
    /// chaos ≥ chaos_min → CHAOS
    pub chaos_min: f64,
    pub concentration_weight: f64,
    pub dispersion_weight: f64,
    pub field_size_weight: f64,
    /// Field size at which the penalty starts
    pub field_size_floor: u32,
    /// Field size at which the penalty is maxed out
    pub field_size_ceiling: u32,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            structure_max: 0.35,
            chaos_min: 0.65,
            concentration_weight: 0.40,
            dispersion_weight: 0.40,
            field_size_weight: 0.20,
            field_size_floor: 4,
            field_size_ceiling: 20,
        }
    }
}

impl ChaosConfig {
    pub fn mode_for(&self, chaos_level: f64) -> ChaosMode {
        if chaos_level < self.structure_max {
            ChaosMode::Structure
        } else if chaos_level < self.chaos_min {
            ChaosMode::Mixed
        } else {
            ChaosMode::Chaos
        }
    }

    /// (concentration, dispersion, field size) weights scaled to sum to 1.0
    pub fn normalized_weights(&self) -> (f64, f64, f64) {
        let total = self.concentration_weight + self.dispersion_weight + self.field_size_weight;
        (
            self.concentration_weight / total,
            self.dispersion_weight / total,
            self.field_size_weight / total,
        )
    }
}

/// Market role ratio window
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoleConfig {
    /// Probability gap under which the top two are considered tied
    pub anchor_epsilon: f64,
    /// Lower edge of the RELEASE window, as a ratio of the anchor's probability
    pub release_ratio_min: f64,
    /// Upper edge of the RELEASE window
    pub release_ratio_max: f64,
    /// Anchor volume share / probability share at which the anchor is absorbing liquidity
    pub absorption_ratio: f64,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            anchor_epsilon: 0.01,
            release_ratio_min: 0.35,
            release_ratio_max: 1.0,
            absorption_ratio: 1.5,
        }
    }
}

/// Rule library thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Confidence at which a contradicting rule hard-overrides a WIN
    pub override_threshold: f64,
    /// Whether confidence == override_threshold counts as reaching it
    pub override_inclusive: bool,
    /// Confidence at which a rule's effect is applied at all
    pub apply_threshold: f64,
    /// TOML seed file used when the database holds no rules
    pub seed_path: Option<String>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            override_threshold: 0.70,
            override_inclusive: true,
            apply_threshold: 0.55,
            seed_path: Some("rules.toml".to_string()),
        }
    }
}

impl RuleConfig {
    pub fn reaches_override(&self, confidence: f64) -> bool {
        if self.override_inclusive {
            confidence >= self.override_threshold
        } else {
            confidence > self.override_threshold
        }
    }

    pub fn is_applied(&self, confidence: f64) -> bool {
        confidence >= self.apply_threshold
    }
}

/// Adversarial review thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdversarialConfig {
    pub high_chaos_threshold: f64,
    pub trip_risk_threshold: f64,
    pub manipulation_threshold: f64,
}

impl Default for AdversarialConfig {
    fn default() -> Self {
        Self {
            high_chaos_threshold: 0.60,
            trip_risk_threshold: 0.50,
            manipulation_threshold: 0.60,
        }
    }
}

/// How equal composite scores are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// runner_id ascending
    RunnerId,
    /// Higher market probability first, then runner_id ascending
    MarketThenRunnerId,
}

/// Composite score weights for the top-4 ranking
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompositeWeights {
    pub ability: f64,
    pub intent: f64,
    pub behavioral: f64,
    pub market: f64,
    pub anchor: f64,
    pub release: f64,
    pub noise: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            ability: 0.40,
            intent: 0.30,
            behavioral: 0.15,
            market: 0.15,
            anchor: 0.0,
            release: 0.03,
            noise: -0.05,
        }
    }
}

/// Decision policy thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum ability for a runner to count as a contender at all
    pub min_ability: f64,
    /// Minimum intent for a runner to count as a contender at all
    pub min_intent: f64,
    pub win_ability_min: f64,
    pub win_intent_min: f64,
    /// Adversarial risk at which win bets are suppressed
    pub max_adversarial_risk: u32,
    pub weights: CompositeWeights,
    pub score_decimals: u32,
    pub tie_break: TieBreak,
    pub shortlist_size: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_ability: 0.40,
            min_intent: 0.40,
            win_ability_min: 0.70,
            win_intent_min: 0.65,
            max_adversarial_risk: 2,
            weights: CompositeWeights::default(),
            score_decimals: 4,
            tie_break: TieBreak::RunnerId,
            shortlist_size: 4,
        }
    }
}

/// Post-race learning gate
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Finishing positions counted as "placed"
    pub place_positions: usize,
    /// Max |ln(SP / decision price)| of the selection before the race is quarantined
    pub max_price_drift: f64,
    /// Post-race manipulation risk tolerated on races flagged before the off
    pub manipulation_tolerance: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            place_positions: 3,
            max_price_drift: 0.5,
            manipulation_tolerance: 0.5,
        }
    }
}

/// Input freshness and audit output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_snapshot_age_secs: i64,
    pub max_signal_age_secs: i64,
    pub audit_log_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_snapshot_age_secs: 900,
            max_signal_age_secs: 3600,
            audit_log_path: "./data/verdicts.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub wal_mode: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data/verdict_engine.db".to_string(),
            wal_mode: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    /// Prometheus endpoint port (disabled when unset)
    pub metrics_port: Option<u16>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// `VERDICT_CONFIG` if set, else the default file, else the example file, else defaults
    pub fn load_or_default() -> Result<Self> {
        if let Ok(path) = env::var("VERDICT_CONFIG") {
            return Self::load(&path);
        }

        for candidate in [DEFAULT_CONFIG_PATH, EXAMPLE_CONFIG_PATH] {
            if Path::new(candidate).exists() {
                return Self::load(candidate);
            }
        }

        log::warn!("⚠️  No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Validate configuration values are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        let unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);

        // Chaos
        let c = &self.chaos;
        if !unit(c.structure_max) || !unit(c.chaos_min) {
            bail!("chaos thresholds must be within [0, 1]");
        }
        if c.structure_max > c.chaos_min {
            bail!("chaos.structure_max must not exceed chaos.chaos_min");
        }
        let weights = [c.concentration_weight, c.dispersion_weight, c.field_size_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            bail!("chaos weights must be finite and ≥ 0");
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            bail!("chaos weights must not all be zero");
        }
        if c.field_size_ceiling <= c.field_size_floor {
            bail!("chaos.field_size_ceiling must exceed chaos.field_size_floor");
        }

        // Roles
        let r = &self.roles;
        if !r.anchor_epsilon.is_finite() || r.anchor_epsilon < 0.0 {
            bail!("roles.anchor_epsilon must be ≥ 0");
        }
        if !unit(r.release_ratio_min) || !unit(r.release_ratio_max) || r.release_ratio_min > r.release_ratio_max {
            bail!("roles release window must satisfy 0 ≤ min ≤ max ≤ 1");
        }
        if !r.absorption_ratio.is_finite() || r.absorption_ratio <= 0.0 {
            bail!("roles.absorption_ratio must be > 0");
        }

        // Rules
        if !unit(self.rules.override_threshold) || !unit(self.rules.apply_threshold) {
            bail!("rule thresholds must be within [0, 1]");
        }
        if self.rules.apply_threshold > self.rules.override_threshold {
            bail!("rules.apply_threshold must not exceed rules.override_threshold");
        }

        // Adversarial
        let a = &self.adversarial;
        if !unit(a.high_chaos_threshold) || !unit(a.trip_risk_threshold) || !unit(a.manipulation_threshold) {
            bail!("adversarial thresholds must be within [0, 1]");
        }

        // Policy
        let p = &self.policy;
        for (name, v) in [
            ("min_ability", p.min_ability),
            ("min_intent", p.min_intent),
            ("win_ability_min", p.win_ability_min),
            ("win_intent_min", p.win_intent_min),
        ] {
            if !unit(v) {
                bail!("policy.{} must be within [0, 1]", name);
            }
        }
        if p.max_adversarial_risk == 0 {
            bail!("policy.max_adversarial_risk must be > 0");
        }
        if p.shortlist_size == 0 {
            bail!("policy.shortlist_size must be > 0");
        }
        if p.score_decimals > 12 {
            bail!("policy.score_decimals must be ≤ 12");
        }
        let w = &p.weights;
        if [w.ability, w.intent, w.behavioral, w.market, w.anchor, w.release, w.noise]
            .iter()
            .any(|v| !v.is_finite())
        {
            bail!("policy.weights must be finite");
        }

        // Learning
        if self.learning.place_positions == 0 {
            bail!("learning.place_positions must be > 0");
        }
        if !self.learning.max_price_drift.is_finite() || self.learning.max_price_drift <= 0.0 {
            bail!("learning.max_price_drift must be > 0");
        }
        if !unit(self.learning.manipulation_tolerance) {
            bail!("learning.manipulation_tolerance must be within [0, 1]");
        }

        // Pipeline
        if self.pipeline.max_snapshot_age_secs <= 0 || self.pipeline.max_signal_age_secs <= 0 {
            bail!("pipeline max ages must be > 0");
        }

        if self.monitoring.metrics_port == Some(0) {
            bail!("monitoring.metrics_port must be > 0");
        }

        Ok(())
    }
}
