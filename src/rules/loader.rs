//! Rule definition sources: TOML seed files and stored database rows
//!
//! Seed file layout:
//!
//! ```toml
//! [[rule]]
//! id = "soft-ground-sprint-fav"
//! name = "Soft ground sprints break favourites"
//! effect = { kind = "suppress_win" }
//! alpha = 8.0
//! beta = 4.0
//!
//! [rule.conditions]
//! distance = { kind = "equals", value = "sprint" }
//! going = { kind = "one_of", values = ["soft", "heavy"] }
//! ```
//!
//! A broken entry is reported and skipped; the rest of the file still loads.

use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::Path;

use crate::db::Database;
use crate::error::RuleLoadError;
use crate::rules::{LoadReport, RuleConditions, RuleDefinition, RuleEffect, RuleStore};

/// Parsed definitions plus the entries that could not be read
#[derive(Debug, Default)]
pub struct ParsedDefinitions {
    pub definitions: Vec<RuleDefinition>,
    pub unparseable: Vec<RuleLoadError>,
}

pub fn load_seed_file<P: AsRef<Path>>(path: P) -> Result<ParsedDefinitions> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule seed file: {}", path.display()))?;

    parse_seed_toml(&contents).with_context(|| format!("Failed to parse rule seed file: {}", path.display()))
}

/// Fails only when the document itself is not TOML
pub fn parse_seed_toml(contents: &str) -> Result<ParsedDefinitions> {
    let document: toml::Table = contents.parse()?;
    let mut parsed = ParsedDefinitions::default();

    let entries = match document.get("rule") {
        Some(toml::Value::Array(entries)) => entries.clone(),
        Some(_) => anyhow::bail!("`rule` must be an array of tables ([[rule]])"),
        None => Vec::new(),
    };

    for (idx, entry) in entries.into_iter().enumerate() {
        let label = entry
            .get("id")
            .and_then(|v| v.as_str())
            .map(|id| format!("#{} ({})", idx + 1, id))
            .unwrap_or_else(|| format!("#{}", idx + 1));

        match entry.try_into::<RuleDefinition>() {
            Ok(def) => parsed.definitions.push(def),
            Err(e) => {
                parsed
                    .unparseable
                    .push(RuleLoadError::Unparseable { entry: label, reason: e.to_string() });
            }
        }
    }

    Ok(parsed)
}

/// One row of the `rules` table, nested fields still as JSON text
#[derive(Debug, Clone)]
pub struct RuleRow {
    pub id: String,
    pub name: String,
    pub conditions_json: String,
    pub effect_json: String,
    pub alpha: f64,
    pub beta: f64,
    pub evidence_count: i64,
    pub active: bool,
    pub version: i64,
}

impl RuleRow {
    pub fn from_definition(def: &RuleDefinition) -> Result<Self> {
        Ok(Self {
            id: def.id.clone(),
            name: def.name.clone(),
            conditions_json: serde_json::to_string(&def.conditions).context("Failed to serialize rule conditions")?,
            effect_json: serde_json::to_string(&def.effect).context("Failed to serialize rule effect")?,
            alpha: def.alpha,
            beta: def.beta,
            evidence_count: def.evidence_count as i64,
            active: def.active,
            version: def.version as i64,
        })
    }

    pub fn into_definition(self) -> Result<RuleDefinition, RuleLoadError> {
        let unparseable = |what: &str, e: serde_json::Error| RuleLoadError::Unparseable {
            entry: format!("row {}", self.id),
            reason: format!("{}: {}", what, e),
        };

        let conditions: RuleConditions =
            serde_json::from_str(&self.conditions_json).map_err(|e| unparseable("conditions", e))?;
        let effect: RuleEffect = serde_json::from_str(&self.effect_json).map_err(|e| unparseable("effect", e))?;

        Ok(RuleDefinition {
            id: self.id,
            name: self.name,
            conditions,
            effect,
            alpha: self.alpha,
            beta: self.beta,
            evidence_count: self.evidence_count.max(0) as u64,
            active: self.active,
            version: self.version.max(0) as u64,
        })
    }
}

/// Build the rule store from the database, seeding it from a TOML file when empty
pub fn load_library(db: &mut Database, seed_path: Option<&str>) -> Result<(RuleStore, LoadReport)> {
    let (definitions, mut unparseable) = if db.rule_count()? > 0 {
        let (definitions, errors) = db.load_rules()?;
        info!("📚 Loading {} rule(s) from database", definitions.len());
        (definitions, errors)
    } else {
        match seed_path.filter(|p| Path::new(p).exists()) {
            Some(path) => {
                let parsed = load_seed_file(path)?;
                info!("🌱 Seeding rule library from {} ({} definition(s))", path, parsed.definitions.len());
                (parsed.definitions, parsed.unparseable)
            }
            None => {
                warn!("⚠️  No stored rules and no seed file, starting with an empty library");
                (Vec::new(), Vec::new())
            }
        }
    };

    for err in &unparseable {
        warn!("⚠️  Rule rejected: {}", err);
    }

    let (store, mut report) = RuleStore::from_definitions(definitions);
    unparseable.append(&mut report.rejected);
    report.rejected = unparseable;

    if db.rule_count()? == 0 && !store.snapshot().is_empty() {
        db.save_rules(store.snapshot().rules())?;
    }

    Ok((store, report))
}
