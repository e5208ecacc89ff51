//! At-most-once settlement ledger
//!
//! Keyed by race_id. The first caller for a race computes the outcome while
//! holding that key's entry; everyone after gets the recorded outcome back.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::learning::LearningOutcome;

#[derive(Clone, Default)]
pub struct OutcomeLedger {
    outcomes: Arc<DashMap<String, LearningOutcome>>,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-populated with outcomes settled in earlier sessions
    pub fn seeded<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = LearningOutcome>,
    {
        let ledger = Self::new();
        for outcome in outcomes {
            ledger.outcomes.insert(outcome.race_id.clone(), outcome);
        }
        ledger
    }

    /// Run `settle` exactly once per race_id
    ///
    /// Returns the outcome and whether this call produced it.
    pub fn settle_once<F>(&self, race_id: &str, settle: F) -> (LearningOutcome, bool)
    where
        F: FnOnce() -> LearningOutcome,
    {
        match self.outcomes.entry(race_id.to_string()) {
            Entry::Occupied(recorded) => (recorded.get().clone(), false),
            Entry::Vacant(slot) => {
                let outcome = settle();
                slot.insert(outcome.clone());
                (outcome, true)
            }
        }
    }

    pub fn get(&self, race_id: &str) -> Option<LearningOutcome> {
        self.outcomes.get(race_id).map(|o| o.clone())
    }

    pub fn contains(&self, race_id: &str) -> bool {
        self.outcomes.contains_key(race_id)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
