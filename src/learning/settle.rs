//! Settlement batch: stored verdicts plus results in, persisted outcomes out

use anyhow::Result;
use log::{info, warn};
use std::collections::BTreeSet;

use crate::db::Database;
use crate::learning::{LearningGate, LearningStatus};
use crate::rules::RuleStore;
use crate::types::RaceResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettleSummary {
    pub committed: usize,
    pub quarantined: usize,
    pub rejected: usize,
    pub evidence_updates: usize,
    pub missing_verdicts: usize,
}

/// Settle each result against its stored verdict.
///
/// Every newly recorded outcome is written together with the rules it moved,
/// so a failure part way through leaves the database at the last settled race.
pub fn settle_results(
    db: &mut Database,
    gate: &LearningGate,
    store: &RuleStore,
    results: &[RaceResult],
) -> Result<SettleSummary> {
    let mut summary = SettleSummary::default();

    for result in results {
        let Some(verdict) = db.get_verdict(&result.race_id)? else {
            warn!("⚠️  {}: no stored verdict, result skipped", result.race_id);
            summary.missing_verdicts += 1;
            continue;
        };

        let settlement = gate.settle(&verdict, result);
        if !settlement.newly_recorded {
            continue;
        }
        let outcome = &settlement.outcome;

        let touched: BTreeSet<&str> = outcome.updates.iter().map(|u| u.rule_id.as_str()).collect();
        let snapshot = store.snapshot();
        let rules = touched.into_iter().filter_map(|id| snapshot.get(id));
        let saved = db.record_settlement(outcome, rules)?;
        if saved > 0 {
            info!("💾 {}: outcome and {} rule(s) persisted", outcome.race_id, saved);
        }

        summary.evidence_updates += outcome.updates.len();
        match outcome.status {
            LearningStatus::Committed => summary.committed += 1,
            LearningStatus::Quarantined => summary.quarantined += 1,
            LearningStatus::Rejected => summary.rejected += 1,
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LearningConfig};
    use crate::decision_engine::pipeline::test_support::race_inputs;
    use crate::decision_engine::RacePipeline;
    use crate::learning::OutcomeLedger;
    use crate::rules::test_support::definition;
    use crate::rules::RuleEffect;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn result(race_id: &str) -> RaceResult {
        RaceResult {
            race_id: race_id.to_string(),
            finishing_order: ["a", "b", "c"].iter().map(|s| s.to_string()).collect(),
            void: false,
            starting_prices: HashMap::new(),
            post_race_manipulation_risk: None,
            result_amended: false,
        }
    }

    fn reopen(db: &Database) -> (Arc<RuleStore>, LearningGate) {
        let (defs, errors) = db.load_rules().unwrap();
        assert!(errors.is_empty());
        let store = Arc::new(RuleStore::from_definitions(defs).0);
        let ledger = OutcomeLedger::seeded(db.load_learning_outcomes().unwrap());
        let gate = LearningGate::with_config(Arc::clone(&store), LearningConfig::default(), ledger);
        (store, gate)
    }

    fn stored_evidence(db: &Database, id: &str) -> u64 {
        let (defs, _) = db.load_rules().unwrap();
        defs.into_iter().find(|d| d.id == id).unwrap().evidence_count
    }

    #[test]
    fn test_failure_after_commit_keeps_evidence_in_step() {
        let mut db = Database::in_memory().unwrap();
        let (store, _) = RuleStore::from_definitions(vec![definition("back-fav", RuleEffect::SupportWin, 3.0, 2.0)]);
        db.save_rules(store.snapshot().rules()).unwrap();

        let store = Arc::new(store);
        let pipeline = RacePipeline::new(&Config::default(), Arc::clone(&store));
        for race_id in ["R1", "R2"] {
            db.insert_verdict(&pipeline.run(&race_inputs(race_id)).unwrap()).unwrap();
        }
        db.connection()
            .execute("UPDATE verdicts SET body = 'x' WHERE race_id = 'R2'", [])
            .unwrap();

        let gate = LearningGate::new(Arc::clone(&store));
        assert!(settle_results(&mut db, &gate, &store, &[result("R1"), result("R2")]).is_err());

        let outcomes = db.load_learning_outcomes().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, LearningStatus::Committed);
        let applied: usize = outcomes.iter().map(|o| o.updates.len()).sum();
        assert_eq!(applied, 1);
        assert_eq!(stored_evidence(&db, "back-fav"), applied as u64);

        // A rerun from the database moves nothing twice
        let (store, gate) = reopen(&db);
        let summary = settle_results(&mut db, &gate, &store, &[result("R1")]).unwrap();
        assert_eq!(summary, SettleSummary::default());
        assert_eq!(stored_evidence(&db, "back-fav"), 1);
    }

    #[test]
    fn test_summary_counts() {
        let mut db = Database::in_memory().unwrap();
        let (store, _) = RuleStore::from_definitions(vec![definition("back-fav", RuleEffect::SupportWin, 3.0, 2.0)]);
        let store = Arc::new(store);
        let pipeline = RacePipeline::new(&Config::default(), Arc::clone(&store));
        db.insert_verdict(&pipeline.run(&race_inputs("R1")).unwrap()).unwrap();

        let mut void = result("R1");
        void.void = true;
        let gate = LearningGate::new(Arc::clone(&store));
        let summary = settle_results(&mut db, &gate, &store, &[void, result("R9")]).unwrap();

        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.missing_verdicts, 1);
        assert_eq!(summary.evidence_updates, 0);
        assert_eq!(db.load_learning_outcomes().unwrap().len(), 1);
        assert_eq!(db.rule_count().unwrap(), 0);
    }
}
