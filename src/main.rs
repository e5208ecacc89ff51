//! 🏇 Verdict Engine - batch driver
//!
//! ```text
//! verdict-engine decide <races.json>     decide a batch of races, persist and log verdicts
//! verdict-engine settle <results.json>   run the learning gate over stored verdicts
//! verdict-engine rules [retire|activate <rule_id>]
//! ```

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::sync::Arc;
use tokio::task::JoinSet;

use verdict_engine::config::Config;
use verdict_engine::db::{Database, VerdictAlreadyRecorded};
use verdict_engine::decision_engine::{RacePipeline, VerdictLogger};
use verdict_engine::learning::{settle_results, LearningGate, OutcomeLedger};
use verdict_engine::metrics;
use verdict_engine::rules::loader::load_library;
use verdict_engine::rules::RuleStore;
use verdict_engine::types::{RaceInputs, RaceResult};

const USAGE: &str = "usage: verdict-engine <decide <races.json> | settle <results.json> | rules [retire|activate <rule_id>]>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = Config::load_or_default().context("Failed to load configuration")?;
    init_logger(&config);
    config.validate().context("Invalid configuration")?;
    info!("✅ Configuration: Loaded");

    metrics::init_metrics();
    if let Some(port) = config.monitoring.metrics_port {
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(port).await {
                error!("❌ Metrics server error: {}", e);
            }
        });
    }

    let args: Vec<String> = env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["decide", path] => decide(&config, path).await,
        ["settle", path] => settle(&config, path),
        ["rules"] => show_rules(&config),
        ["rules", "retire", rule_id] => toggle_rule(&config, rule_id, false),
        ["rules", "activate", rule_id] => toggle_rule(&config, rule_id, true),
        _ => bail!(USAGE),
    }
}

fn init_logger(config: &Config) {
    let level = env::var("LOG_LEVEL").unwrap_or_else(|_| config.monitoring.log_level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn read_json<T: DeserializeOwned>(path: &str) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path))
}

fn open_store(config: &Config) -> Result<(Database, Arc<RuleStore>)> {
    let mut db = Database::new(&config.database.path, config.database.wal_mode)?;
    info!("✅ SQLite: Connected ({})", config.database.path);

    let (store, report) = load_library(&mut db, config.rules.seed_path.as_deref())?;
    metrics::record_rules_rejected(report.rejected.len());
    info!(
        "📚 Rule library v{}: {} loaded, {} rejected",
        store.snapshot().version(),
        report.loaded,
        report.rejected.len()
    );

    Ok((db, Arc::new(store)))
}

async fn decide(config: &Config, path: &str) -> Result<()> {
    let races: Vec<RaceInputs> = read_json(path)?;
    let (mut db, store) = open_store(config)?;
    let pipeline = Arc::new(RacePipeline::new(config, store));
    let logger = VerdictLogger::new(&config.pipeline.audit_log_path)?;

    info!("🏁 Deciding {} race(s) from {}", races.len(), path);

    let mut tasks = JoinSet::new();
    for inputs in races {
        let pipeline = Arc::clone(&pipeline);
        tasks.spawn_blocking(move || pipeline.run(&inputs));
    }

    let (mut decided, mut suppressed, mut aborted, mut duplicates) = (0usize, 0usize, 0usize, 0usize);
    while let Some(joined) = tasks.join_next().await {
        let verdict = match joined {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                aborted += 1;
                warn!("⛔ {}: no verdict ({})", e.race_id(), e);
                continue;
            }
            Err(e) => {
                aborted += 1;
                error!("❌ Race task failed: {}", e);
                continue;
            }
        };

        match db.insert_verdict(&verdict) {
            Ok(record_id) => {
                decided += 1;
                if verdict.is_suppressed() {
                    suppressed += 1;
                }
                info!("💾 {}: verdict stored as {}", verdict.race_id, record_id);
                if let Err(e) = logger.log_verdict(&verdict) {
                    warn!("⚠️  {}: audit log write failed: {}", verdict.race_id, e);
                }
            }
            Err(e) if e.downcast_ref::<VerdictAlreadyRecorded>().is_some() => {
                duplicates += 1;
                warn!("⚠️  {}", e);
            }
            Err(e) => {
                aborted += 1;
                error!("❌ {}: {:#}", verdict.race_id, e);
            }
        }
    }

    info!(
        "✅ Batch done: {} verdict(s) stored ({} suppressed), {} without verdict, {} already recorded",
        decided, suppressed, aborted, duplicates
    );
    Ok(())
}

fn settle(config: &Config, path: &str) -> Result<()> {
    let results: Vec<RaceResult> = read_json(path)?;
    let (mut db, store) = open_store(config)?;

    let ledger = OutcomeLedger::seeded(db.load_learning_outcomes()?);
    info!("📒 {} race(s) already settled", ledger.len());
    let gate = LearningGate::with_config(Arc::clone(&store), config.learning.clone(), ledger);

    let summary = settle_results(&mut db, &gate, &store, &results)?;

    info!(
        "✅ Settlement done: {} committed, {} quarantined, {} rejected, {} evidence update(s), {} without verdict",
        summary.committed, summary.quarantined, summary.rejected, summary.evidence_updates, summary.missing_verdicts
    );
    Ok(())
}

fn show_rules(config: &Config) -> Result<()> {
    let (_db, store) = open_store(config)?;
    let library = store.snapshot();

    println!("\n======================================================================");
    println!("📚 RULE LIBRARY v{} ({} rule(s))", library.version(), library.len());
    println!("======================================================================");
    for rule in library.rules() {
        println!(
            "{} {:<28} {:<16} conf={:.3} α={:.1} β={:.1} n={}",
            if rule.active { "✅" } else { "💤" },
            rule.id,
            rule.effect.kind(),
            rule.confidence(),
            rule.alpha,
            rule.beta,
            rule.evidence_count
        );
        println!("   {}", rule.name);
    }
    println!("======================================================================\n");
    Ok(())
}

fn toggle_rule(config: &Config, rule_id: &str, active: bool) -> Result<()> {
    let (mut db, store) = open_store(config)?;
    let rule = if active { store.activate(rule_id)? } else { store.retire(rule_id)? };
    db.upsert_rule(&rule.to_definition())?;
    info!(
        "{} Rule {} is now {}",
        if active { "✅" } else { "💤" },
        rule.id,
        if rule.active { "active" } else { "retired" }
    );
    Ok(())
}
