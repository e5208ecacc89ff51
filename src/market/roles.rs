//! 🎭 Market Role Classification
//!
//! Labels every runner by how the market is using it:
//! - ANCHOR: the single top-ranked runner (price-absorbing favourite)
//! - RELEASE: runners whose probability sits inside a ratio window of the anchor's
//! - NOISE: everything priced out, plus runners with no usable price
//!
//! The shortest-priced runner is never NOISE.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::RoleConfig;
use crate::market::MarketBook;
use crate::types::MarketRole;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerRoleEntry {
    pub runner_id: String,
    pub role: MarketRole,
    /// Normalised implied probability (None when unpriced)
    pub probability: Option<f64>,
    /// 1-based market rank (None when unpriced)
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub race_id: String,
    /// Ordered by market rank, unpriced runners last by runner_id
    pub entries: Vec<RunnerRoleEntry>,
    pub anchor: String,
    /// Runners within epsilon of the anchor's probability
    pub contested_by: Vec<String>,
    /// Anchor volume share / anchor probability share, when volumes are known
    pub absorption: Option<f64>,
    /// Anchor is soaking up liquidity out of proportion to its chance
    pub absorbing: bool,
}

impl RoleAssignment {
    pub fn role_of(&self, runner_id: &str) -> MarketRole {
        self.entries
            .iter()
            .find(|e| e.runner_id == runner_id)
            .map(|e| e.role)
            .unwrap_or(MarketRole::Noise)
    }

    pub fn probability_of(&self, runner_id: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.runner_id == runner_id)
            .and_then(|e| e.probability)
    }

    pub fn runners_with_role(&self, role: MarketRole) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.role == role)
            .map(|e| e.runner_id.as_str())
            .collect()
    }

    pub fn count(&self, role: MarketRole) -> usize {
        self.entries.iter().filter(|e| e.role == role).count()
    }
}

pub struct MarketRoleClassifier {
    config: RoleConfig,
}

impl Default for MarketRoleClassifier {
    fn default() -> Self {
        Self::with_config(RoleConfig::default())
    }
}

impl MarketRoleClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RoleConfig) -> Self {
        Self { config }
    }

    /// Assign one role per runner
    ///
    /// `MarketBook` can only be built with at least two priced runners, so `ranked[0]` exists.
    pub fn classify(&self, book: &MarketBook) -> RoleAssignment {
        let ranked = book.ranked();
        let anchor = ranked[0];
        let anchor_p = anchor.probability;

        let contested_by: Vec<String> = ranked[1..]
            .iter()
            .filter(|e| anchor_p - e.probability <= self.config.anchor_epsilon)
            .map(|e| e.runner_id.clone())
            .collect();

        let shortest = self.shortest_priced(book);

        let mut entries: Vec<RunnerRoleEntry> = ranked
            .iter()
            .enumerate()
            .map(|(idx, e)| {
                let role = if idx == 0 {
                    MarketRole::Anchor
                } else {
                    let ratio = if anchor_p > 0.0 { e.probability / anchor_p } else { 0.0 };
                    let in_window = ratio >= self.config.release_ratio_min
                        && ratio <= self.config.release_ratio_max;
                    // A co-favourite within epsilon is anchor-eligible, so never NOISE
                    let contested = anchor_p - e.probability <= self.config.anchor_epsilon;
                    if in_window || contested || Some(e.runner_id.as_str()) == shortest {
                        MarketRole::Release
                    } else {
                        MarketRole::Noise
                    }
                };

                RunnerRoleEntry {
                    runner_id: e.runner_id.clone(),
                    role,
                    probability: Some(e.probability),
                    rank: Some(idx + 1),
                }
            })
            .collect();

        let mut unpriced = book.unpriced().to_vec();
        unpriced.sort();
        entries.extend(unpriced.into_iter().map(|runner_id| RunnerRoleEntry {
            runner_id,
            role: MarketRole::Noise,
            probability: None,
            rank: None,
        }));

        let absorption = self.absorption(book, &anchor.runner_id, anchor_p);
        let absorbing = absorption
            .map(|ratio| ratio >= self.config.absorption_ratio)
            .unwrap_or(false);

        let assignment = RoleAssignment {
            race_id: book.race_id().to_string(),
            entries,
            anchor: anchor.runner_id.clone(),
            contested_by,
            absorption,
            absorbing,
        };

        debug!(
            "🎭 {}: anchor={} (p={:.3}{}) release={} noise={}{}",
            book.race_id(),
            assignment.anchor,
            anchor_p,
            if assignment.contested_by.is_empty() { "" } else { ", contested" },
            assignment.count(MarketRole::Release),
            assignment.count(MarketRole::Noise),
            if assignment.absorbing { " | absorbing liquidity" } else { "" },
        );

        assignment
    }

    /// Runner with the single lowest price, ties broken by runner_id
    fn shortest_priced<'a>(&self, book: &'a MarketBook) -> Option<&'a str> {
        book.entries()
            .iter()
            .min_by(|a, b| {
                a.price
                    .total_cmp(&b.price)
                    .then_with(|| a.runner_id.cmp(&b.runner_id))
            })
            .map(|e| e.runner_id.as_str())
    }

    /// Anchor's traded-volume share divided by its probability share
    fn absorption(&self, book: &MarketBook, anchor_id: &str, anchor_p: f64) -> Option<f64> {
        let total_volume: f64 = book.entries().iter().filter_map(|e| e.traded_volume).sum();
        if total_volume <= 0.0 || anchor_p <= 0.0 {
            return None;
        }

        let anchor_volume = book
            .entries()
            .iter()
            .find(|e| e.runner_id == anchor_id)
            .and_then(|e| e.traded_volume)?;

        Some((anchor_volume / total_volume) / anchor_p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::test_support::snapshot_from_probabilities;
    use crate::types::{MarketSnapshot, RunnerQuote};

    fn assign(snapshot: &MarketSnapshot) -> RoleAssignment {
        let book = MarketBook::from_snapshot(snapshot, snapshot.runners.len() as u32).unwrap();
        MarketRoleClassifier::new().classify(&book)
    }

    #[test]
    fn test_reference_market_roles() {
        let snapshot = snapshot_from_probabilities(
            "R1",
            &[("a", 0.40), ("b", 0.25), ("c", 0.15), ("d", 0.10), ("e", 0.10)],
        );
        let roles = assign(&snapshot);

        assert_eq!(roles.anchor, "a");
        assert_eq!(roles.role_of("a"), MarketRole::Anchor);
        assert_eq!(roles.role_of("b"), MarketRole::Release);
        assert_eq!(roles.role_of("d"), MarketRole::Noise);
        assert_eq!(roles.role_of("e"), MarketRole::Noise);
        assert_eq!(roles.count(MarketRole::Anchor), 1);
        assert!(roles.contested_by.is_empty());
    }

    #[test]
    fn test_shortest_price_never_noise() {
        // Tight release window so only the anchor could qualify on ratio alone
        let classifier = MarketRoleClassifier::with_config(RoleConfig {
            release_ratio_min: 0.99,
            ..Default::default()
        });
        let snapshot = snapshot_from_probabilities("R1", &[("x", 0.3), ("fav", 0.5), ("y", 0.2)]);
        let book = MarketBook::from_snapshot(&snapshot, 3).unwrap();
        let roles = classifier.classify(&book);

        assert_ne!(roles.role_of("fav"), MarketRole::Noise);
        assert_eq!(roles.role_of("x"), MarketRole::Noise);
    }

    #[test]
    fn test_tied_anchor_resolved_by_runner_id() {
        let snapshot = snapshot_from_probabilities("R1", &[("m", 0.35), ("k", 0.35), ("z", 0.30)]);
        let roles = assign(&snapshot);

        assert_eq!(roles.anchor, "k");
        assert_eq!(roles.role_of("m"), MarketRole::Release);
        assert_eq!(roles.contested_by, vec!["m".to_string()]);
        assert_eq!(roles.count(MarketRole::Anchor), 1);
    }

    #[test]
    fn test_contested_runner_is_release_with_narrow_window() {
        let classifier = MarketRoleClassifier::with_config(RoleConfig {
            release_ratio_max: 0.9,
            ..Default::default()
        });
        let snapshot = snapshot_from_probabilities("R1", &[("k", 0.35), ("m", 0.347), ("z", 0.303)]);
        let book = MarketBook::from_snapshot(&snapshot, 3).unwrap();
        let roles = classifier.classify(&book);

        assert_eq!(roles.anchor, "k");
        assert_eq!(roles.contested_by, vec!["m".to_string()]);
        assert_eq!(roles.role_of("m"), MarketRole::Release);
        // 0.303 / 0.35 ≈ 0.866, inside the narrowed window
        assert_eq!(roles.role_of("z"), MarketRole::Release);
        assert_eq!(roles.count(MarketRole::Anchor), 1);
    }

    #[test]
    fn test_roles_independent_of_declaration_order() {
        let forward = snapshot_from_probabilities("R1", &[("a", 0.5), ("b", 0.3), ("c", 0.15), ("d", 0.05)]);
        let reversed = snapshot_from_probabilities("R1", &[("d", 0.05), ("c", 0.15), ("b", 0.3), ("a", 0.5)]);

        let f = assign(&forward);
        let r = assign(&reversed);
        assert_eq!(f.entries, r.entries);
    }

    #[test]
    fn test_unpriced_runner_is_noise() {
        let mut snapshot = snapshot_from_probabilities("R1", &[("a", 0.6), ("b", 0.4)]);
        snapshot.runners.push(RunnerQuote {
            runner_id: "scratched".to_string(),
            ..Default::default()
        });
        let roles = assign(&snapshot);

        assert_eq!(roles.role_of("scratched"), MarketRole::Noise);
        assert_eq!(roles.entries.last().unwrap().rank, None);
    }

    #[test]
    fn test_liquidity_absorption() {
        let mut snapshot = snapshot_from_probabilities("R1", &[("fav", 0.4), ("b", 0.35), ("c", 0.25)]);
        let volumes = [8_000.0, 1_000.0, 1_000.0];
        for (quote, volume) in snapshot.runners.iter_mut().zip(volumes) {
            quote.traded_volume = Some(volume);
        }
        let roles = assign(&snapshot);

        // 80% of the money on a 40% chance
        assert!((roles.absorption.unwrap() - 2.0).abs() < 1e-9);
        assert!(roles.absorbing);
    }

    #[test]
    fn test_no_volume_means_no_absorption() {
        let snapshot = snapshot_from_probabilities("R1", &[("a", 0.6), ("b", 0.4)]);
        let roles = assign(&snapshot);
        assert_eq!(roles.absorption, None);
        assert!(!roles.absorbing);
    }
}
