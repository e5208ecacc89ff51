//! 🌪️ Market Concentration ("chaos") Scoring
//!
//! Combines three views of the normalised book into a 0-1 chaos level:
//! - Concentration: Herfindahl index H = Σp², rescaled so a uniform book is 0
//! - Dispersion: Gini coefficient of the probabilities, rescaled to its maximum for n runners
//! - Field size: linear penalty between a floor and a ceiling
//!
//! chaos = w_c·(1 − √H*) + w_d·(1 − G*) + w_f·F, clamped to [0,1].
//! Concentrated, dispersed markets score low (STRUCTURE); flat, big fields score high (CHAOS).

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::ChaosConfig;
use crate::error::PipelineError;
use crate::market::MarketBook;
use crate::types::{ChaosMode, MarketSnapshot};

/// Raw components behind a chaos level, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosComponents {
    /// Herfindahl index Σp²
    pub concentration_index: f64,
    /// (H − 1/n) / (1 − 1/n)
    pub normalized_concentration: f64,
    pub gini: f64,
    /// Gini rescaled by n/(n − 1)
    pub normalized_gini: f64,
    pub field_size_penalty: f64,
    pub priced_runners: usize,
    pub field_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosResult {
    pub chaos_level: f64,
    pub mode: ChaosMode,
    pub components: ChaosComponents,
}

impl ChaosResult {
    pub fn breakdown(&self) -> String {
        format!(
            "chaos={:.3} {} (H={:.3}, H*={:.3}, G*={:.3}, F={:.3}) | {}/{} priced",
            self.chaos_level,
            self.mode.as_str(),
            self.components.concentration_index,
            self.components.normalized_concentration,
            self.components.normalized_gini,
            self.components.field_size_penalty,
            self.components.priced_runners,
            self.components.field_size,
        )
    }
}

/// Chaos classifier with configurable weights and mode thresholds
pub struct ConcentrationClassifier {
    config: ChaosConfig,
}

impl Default for ConcentrationClassifier {
    fn default() -> Self {
        Self::with_config(ChaosConfig::default())
    }
}

impl ConcentrationClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ChaosConfig) -> Self {
        Self { config }
    }

    /// Build the book from a snapshot and classify it
    pub fn classify_snapshot(
        &self,
        snapshot: &MarketSnapshot,
        field_size: u32,
    ) -> Result<ChaosResult, PipelineError> {
        let book = MarketBook::from_snapshot(snapshot, field_size)?;
        Ok(self.classify(&book))
    }

    /// Classify an already normalised book
    pub fn classify(&self, book: &MarketBook) -> ChaosResult {
        let probabilities: Vec<f64> = book.entries().iter().map(|e| e.probability).collect();
        let n = probabilities.len() as f64;

        let concentration_index = herfindahl(&probabilities);
        let normalized_concentration = ((concentration_index - 1.0 / n) / (1.0 - 1.0 / n)).clamp(0.0, 1.0);

        let gini = gini(&probabilities);
        let normalized_gini = (gini * n / (n - 1.0)).clamp(0.0, 1.0);

        let field_size_penalty = self.field_size_penalty(book.field_size());

        let (w_c, w_d, w_f) = self.config.normalized_weights();
        let chaos_level = (w_c * (1.0 - normalized_concentration.sqrt())
            + w_d * (1.0 - normalized_gini)
            + w_f * field_size_penalty)
            .clamp(0.0, 1.0);

        let result = ChaosResult {
            chaos_level,
            mode: self.config.mode_for(chaos_level),
            components: ChaosComponents {
                concentration_index,
                normalized_concentration,
                gini,
                normalized_gini,
                field_size_penalty,
                priced_runners: book.priced_count(),
                field_size: book.field_size(),
            },
        };

        debug!("🌪️ {}: {}", book.race_id(), result.breakdown());
        result
    }

    /// 0 at or below the floor, 1 at or above the ceiling
    fn field_size_penalty(&self, field_size: u32) -> f64 {
        let floor = self.config.field_size_floor as f64;
        let ceiling = self.config.field_size_ceiling as f64;
        ((field_size as f64 - floor) / (ceiling - floor)).clamp(0.0, 1.0)
    }
}

fn herfindahl(probabilities: &[f64]) -> f64 {
    probabilities.iter().map(|p| p * p).sum()
}

/// Gini coefficient: Σ(2i − n − 1)·x₍ᵢ₎ / (n·Σx) over ascending order
fn gini(values: &[f64]) -> f64 {
    let total: f64 = values.iter().sum();
    if values.is_empty() || total <= 0.0 {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len() as f64;
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (2.0 * (i as f64 + 1.0) - n - 1.0) * x)
        .sum();

    weighted / (n * total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::test_support::snapshot_from_probabilities;

    fn classify(probabilities: &[(&str, f64)], field_size: u32) -> ChaosResult {
        let snapshot = snapshot_from_probabilities("R1", probabilities);
        ConcentrationClassifier::new()
            .classify_snapshot(&snapshot, field_size)
            .unwrap()
    }

    #[test]
    fn test_gini_values() {
        assert!(gini(&[0.25, 0.25, 0.25, 0.25]).abs() < 1e-12);
        // Pairwise |xi − xj| sum is 3.0 over ordered pairs → 3.0 / (2·5) = 0.30
        assert!((gini(&[0.40, 0.25, 0.15, 0.10, 0.10]) - 0.30).abs() < 1e-9);
        assert_eq!(gini(&[]), 0.0);
    }

    #[test]
    fn test_reference_market_is_mixed() {
        let result = classify(
            &[("a", 0.40), ("b", 0.25), ("c", 0.15), ("d", 0.10), ("e", 0.10)],
            5,
        );

        assert!((result.components.concentration_index - 0.265).abs() < 1e-6);
        assert!((result.components.normalized_gini - 0.375).abs() < 1e-6);
        // 0.4·(1 − √0.08125) + 0.4·0.625 + 0.2·0.0625 ≈ 0.5485
        assert!((result.chaos_level - 0.5485).abs() < 1e-3);
        assert_eq!(result.mode, ChaosMode::Mixed);
    }

    #[test]
    fn test_strong_favourite_is_structure() {
        let result = classify(&[("a", 0.70), ("b", 0.10), ("c", 0.10), ("d", 0.10)], 4);
        assert!((result.chaos_level - 0.32).abs() < 1e-6);
        assert_eq!(result.mode, ChaosMode::Structure);
    }

    #[test]
    fn test_flat_big_field_is_chaos() {
        let runners: Vec<(String, f64)> = (0..10).map(|i| (format!("r{}", i), 0.1)).collect();
        let borrowed: Vec<(&str, f64)> = runners.iter().map(|(id, p)| (id.as_str(), *p)).collect();

        let result = classify(&borrowed, 10);
        assert!((result.chaos_level - 0.875).abs() < 1e-6);
        assert_eq!(result.mode, ChaosMode::Chaos);
    }

    #[test]
    fn test_deterministic_and_bounded() {
        let runners = [("a", 0.33), ("b", 0.27), ("c", 0.2), ("d", 0.12), ("e", 0.08)];
        let first = classify(&runners, 12);
        for _ in 0..20 {
            let again = classify(&runners, 12);
            assert_eq!(first.chaos_level.to_bits(), again.chaos_level.to_bits());
        }
        assert!((0.0..=1.0).contains(&first.chaos_level));
    }

    #[test]
    fn test_chaos_varies_across_markets() {
        let markets: Vec<Vec<(&str, f64)>> = vec![
            vec![("a", 0.6), ("b", 0.3), ("c", 0.1)],
            vec![("a", 0.4), ("b", 0.35), ("c", 0.25)],
            vec![("a", 0.34), ("b", 0.33), ("c", 0.33)],
            vec![("a", 0.8), ("b", 0.1), ("c", 0.1)],
        ];

        let mut levels: Vec<f64> = markets.iter().map(|m| classify(m, 3).chaos_level).collect();
        levels.sort_by(|a, b| a.total_cmp(b));
        levels.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        assert_eq!(levels.len(), markets.len());
    }

    #[test]
    fn test_bigger_field_raises_chaos() {
        let runners = [("a", 0.5), ("b", 0.3), ("c", 0.2)];
        let small = classify(&runners, 4);
        let large = classify(&runners, 20);
        assert!(large.chaos_level > small.chaos_level);
        assert_eq!(large.components.field_size_penalty, 1.0);
    }

    #[test]
    fn test_custom_thresholds_change_mode_only() {
        let snapshot = snapshot_from_probabilities(
            "R1",
            &[("a", 0.40), ("b", 0.25), ("c", 0.15), ("d", 0.10), ("e", 0.10)],
        );
        let strict = ConcentrationClassifier::with_config(ChaosConfig {
            chaos_min: 0.50,
            ..Default::default()
        });
        let default = ConcentrationClassifier::new();

        let a = strict.classify_snapshot(&snapshot, 5).unwrap();
        let b = default.classify_snapshot(&snapshot, 5).unwrap();
        assert_eq!(a.chaos_level, b.chaos_level);
        assert_eq!(a.mode, ChaosMode::Chaos);
        assert_eq!(b.mode, ChaosMode::Mixed);
    }
}
