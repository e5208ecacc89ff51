//! 🗄️ Copy-on-write rule library
//!
//! Readers take an `Arc<RuleLibrary>` snapshot and never see a half-applied update.
//! Writers are serialised by a single mutex, clone the library, mutate the clone
//! and publish it by swapping the `Arc`.

use log::{info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::{RuleLoadError, RuleStoreError};
use crate::rules::{Rule, RuleDefinition};

/// Immutable view of every rule at one library version
#[derive(Debug, Clone, Default)]
pub struct RuleLibrary {
    version: u64,
    /// Sorted by rule id
    rules: Vec<Rule>,
}

impl RuleLibrary {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules
            .binary_search_by(|r| r.id.as_str().cmp(rule_id))
            .ok()
            .map(|idx| &self.rules[idx])
    }

    pub fn active(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.active)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn get_mut(&mut self, rule_id: &str) -> Option<&mut Rule> {
        self.rules
            .binary_search_by(|r| r.id.as_str().cmp(rule_id))
            .ok()
            .map(move |idx| &mut self.rules[idx])
    }
}

/// Outcome of loading a batch of definitions
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub rejected: Vec<RuleLoadError>,
}

pub struct RuleStore {
    current: RwLock<Arc<RuleLibrary>>,
    writer: Mutex<()>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleLibrary::default())),
            writer: Mutex::new(()),
        }
    }
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate definitions and build a store from the valid ones
    ///
    /// Invalid or duplicate definitions are logged, reported and left out.
    pub fn from_definitions(definitions: Vec<RuleDefinition>) -> (Self, LoadReport) {
        let mut report = LoadReport::default();
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(definitions.len());

        for def in definitions {
            if !seen.insert(def.id.clone()) {
                report.rejected.push(RuleLoadError::DuplicateId { rule_id: def.id });
                continue;
            }
            match Rule::from_definition(def) {
                Ok(rule) => rules.push(rule),
                Err(e) => report.rejected.push(e),
            }
        }

        for err in &report.rejected {
            warn!("⚠️  Rule rejected: {}", err);
        }

        rules.sort_by(|a, b| a.id.cmp(&b.id));
        report.loaded = rules.len();
        info!(
            "📚 Rule library loaded: {} rule(s), {} active, {} rejected",
            report.loaded,
            rules.iter().filter(|r| r.active).count(),
            report.rejected.len()
        );

        let store = Self {
            current: RwLock::new(Arc::new(RuleLibrary { version: 0, rules })),
            writer: Mutex::new(()),
        };
        (store, report)
    }

    /// Consistent snapshot of the whole library
    pub fn snapshot(&self) -> Arc<RuleLibrary> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record one observation: improved → alpha += 1, otherwise beta += 1
    ///
    /// Returns the updated rule.
    pub fn update_evidence(&self, rule_id: &str, improved: bool) -> Result<Rule, RuleStoreError> {
        self.mutate(rule_id, |rule| {
            if improved {
                rule.alpha += 1.0;
            } else {
                rule.beta += 1.0;
            }
            rule.evidence_count += 1;
            rule.version += 1;
        })
    }

    pub fn retire(&self, rule_id: &str) -> Result<Rule, RuleStoreError> {
        self.mutate(rule_id, |rule| rule.active = false)
    }

    pub fn activate(&self, rule_id: &str) -> Result<Rule, RuleStoreError> {
        self.mutate(rule_id, |rule| rule.active = true)
    }

    fn mutate<F>(&self, rule_id: &str, apply: F) -> Result<Rule, RuleStoreError>
    where
        F: FnOnce(&mut Rule),
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = (*self.snapshot()).clone();
        let rule = next
            .get_mut(rule_id)
            .ok_or_else(|| RuleStoreError::UnknownRule(rule_id.to_string()))?;
        apply(rule);
        let updated = rule.clone();
        next.version += 1;

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::definition;
    use crate::rules::RuleEffect;
    use std::thread;

    fn store(defs: Vec<RuleDefinition>) -> RuleStore {
        RuleStore::from_definitions(defs).0
    }

    #[test]
    fn test_rejects_invalid_and_duplicate_definitions() {
        let (store, report) = RuleStore::from_definitions(vec![
            definition("b", RuleEffect::SupportWin, 2.0, 2.0),
            definition("a", RuleEffect::SuppressWin, 1.0, 1.0),
            definition("a", RuleEffect::PreferEachWay, 1.0, 1.0),
            definition("bad", RuleEffect::SupportWin, -1.0, 1.0),
        ]);

        assert_eq!(report.loaded, 2);
        assert_eq!(report.rejected.len(), 2);
        assert!(report
            .rejected
            .contains(&RuleLoadError::DuplicateId { rule_id: "a".to_string() }));

        let library = store.snapshot();
        let ids: Vec<&str> = library.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(library.get("a").unwrap().effect, RuleEffect::SuppressWin);
    }

    #[test]
    fn test_update_evidence() {
        let store = store(vec![definition("r1", RuleEffect::SuppressWin, 13.0, 6.0)]);

        let updated = store.update_evidence("r1", true).unwrap();
        assert_eq!(updated.alpha, 14.0);
        assert_eq!(updated.beta, 6.0);
        assert_eq!(updated.evidence_count, 1);
        assert_eq!(updated.version, 1);
        assert!((updated.confidence() - 0.7).abs() < 1e-12);

        let updated = store.update_evidence("r1", false).unwrap();
        assert_eq!(updated.beta, 7.0);
        assert_eq!(updated.evidence_count, 2);
        assert_eq!(store.snapshot().version(), 2);
    }

    #[test]
    fn test_unknown_rule() {
        let store = store(vec![]);
        assert_eq!(
            store.update_evidence("ghost", true).unwrap_err(),
            RuleStoreError::UnknownRule("ghost".to_string())
        );
        assert_eq!(store.snapshot().version(), 0);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_updates() {
        let store = store(vec![definition("r1", RuleEffect::SupportWin, 1.0, 1.0)]);
        let before = store.snapshot();

        store.update_evidence("r1", true).unwrap();

        assert_eq!(before.get("r1").unwrap().alpha, 1.0);
        assert_eq!(store.snapshot().get("r1").unwrap().alpha, 2.0);
    }

    #[test]
    fn test_retire_and_activate() {
        let store = store(vec![definition("r1", RuleEffect::SupportWin, 3.0, 1.0)]);

        let retired = store.retire("r1").unwrap();
        assert!(!retired.active);
        assert_eq!(retired.evidence_count, 0);
        assert_eq!(store.snapshot().active().count(), 0);

        store.activate("r1").unwrap();
        assert_eq!(store.snapshot().active().count(), 1);
    }

    #[test]
    fn test_concurrent_updates_are_serialised() {
        let store = Arc::new(store(vec![definition("r1", RuleEffect::SupportWin, 1.0, 1.0)]));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..25 {
                        store.update_evidence("r1", i % 2 == 0).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let rule = store.snapshot().get("r1").cloned().unwrap();
        assert_eq!(rule.evidence_count, 200);
        assert_eq!(rule.alpha + rule.beta, 202.0);
        assert_eq!(rule.version, 200);
    }
}
