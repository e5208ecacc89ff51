//! 📝 Verdict Audit Log
//!
//! Appends one CSV row per verdict for offline analysis.
//! Records: sequence, race, chassis, selection, top-4, fades, risk, rule hits, chaos, reason.

use anyhow::{Context, Result};
use log::info;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::decision_engine::verdict::Verdict;

/// One audit row
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictLogEntry {
    pub sequence: u64,
    pub race_id: String,
    pub decided_at: String,
    pub chassis: String,
    pub top_selection: String,
    pub selection_price: Option<f64>,
    pub top4: String,
    pub fade_list: String,
    pub win_suppressed: bool,
    pub adversarial_risk: u32,
    pub failure_modes: String,
    pub rule_hits: String,
    pub chaos_level: Option<f64>,
    pub chaos_mode: String,
    pub anchor: String,
    pub reason: String,
}

impl From<&Verdict> for VerdictLogEntry {
    fn from(v: &Verdict) -> Self {
        Self {
            sequence: 0,
            race_id: v.race_id.clone(),
            decided_at: v.decided_at.to_rfc3339(),
            chassis: v.chassis.as_str().to_string(),
            top_selection: v.top_selection.clone().unwrap_or_default(),
            selection_price: v.selection_price,
            top4: v.top4.join("|"),
            fade_list: v.fade_list.join("|"),
            win_suppressed: v.win_suppressed,
            adversarial_risk: v.adversarial_risk,
            failure_modes: v.adversarial.as_ref().map(|f| f.summary()).unwrap_or_default(),
            rule_hits: v
                .rule_hits
                .iter()
                .map(|h| format!("{}@{:.3}", h.rule_id, h.confidence))
                .collect::<Vec<_>>()
                .join("|"),
            chaos_level: v.chaos.as_ref().map(|c| c.chaos_level),
            chaos_mode: v.chaos.as_ref().map(|c| c.mode.as_str().to_string()).unwrap_or_default(),
            anchor: v.anchor.clone().unwrap_or_default(),
            reason: v.reason.clone(),
        }
    }
}

/// Quote a field when it holds a delimiter, quote or newline
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

impl VerdictLogEntry {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.sequence,
            csv_field(&self.race_id),
            self.decided_at,
            self.chassis,
            csv_field(&self.top_selection),
            self.selection_price.map(|p| format!("{:.2}", p)).unwrap_or_default(),
            csv_field(&self.top4),
            csv_field(&self.fade_list),
            self.win_suppressed,
            self.adversarial_risk,
            self.failure_modes,
            csv_field(&self.rule_hits),
            self.chaos_level.map(|c| format!("{:.4}", c)).unwrap_or_default(),
            self.chaos_mode,
            csv_field(&self.anchor),
            csv_field(&self.reason),
        )
    }

    pub fn csv_header() -> &'static str {
        "sequence,race_id,decided_at,chassis,top_selection,selection_price,top4,fade_list,win_suppressed,adversarial_risk,failure_modes,rule_hits,chaos_level,chaos_mode,anchor,reason"
    }
}

/// Audit logger that appends to a CSV file
pub struct VerdictLogger {
    log_file: Arc<Mutex<File>>,
    sequence: Arc<Mutex<u64>>,
}

impl VerdictLogger {
    /// Open the log, writing the header if the file is new
    pub fn new<P: AsRef<Path>>(log_path: P) -> Result<Self> {
        let path = log_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create audit log directory")?;
        }
        let file_exists = path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit log: {:?}", path))?;

        if !file_exists {
            writeln!(file, "{}", VerdictLogEntry::csv_header()).context("Failed to write CSV header")?;
            file.flush()?;
            info!("📝 Created new verdict log: {:?}", path);
        } else {
            info!("📝 Opened existing verdict log: {:?}", path);
        }

        Ok(Self {
            log_file: Arc::new(Mutex::new(file)),
            sequence: Arc::new(Mutex::new(1)),
        })
    }

    /// Append a verdict; returns its sequence number in this session
    pub fn log_verdict(&self, verdict: &Verdict) -> Result<u64> {
        let mut entry = VerdictLogEntry::from(verdict);

        let sequence = {
            let mut counter = self.sequence.lock().unwrap_or_else(PoisonError::into_inner);
            let id = *counter;
            *counter += 1;
            id
        };
        entry.sequence = sequence;

        {
            let mut file = self.log_file.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(file, "{}", entry.to_csv_row()).context("Failed to write verdict row")?;
            file.flush()?;
        }

        info!(
            "📝 Logged verdict #{}: race={}, chassis={}, selection={}",
            sequence,
            entry.race_id,
            entry.chassis,
            if entry.top_selection.is_empty() { "-" } else { &entry.top_selection }
        );

        Ok(sequence)
    }

    pub fn entries_logged(&self) -> u64 {
        *self.sequence.lock().unwrap_or_else(PoisonError::into_inner) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn verdict() -> Verdict {
        let mut v = Verdict::suppressed("R1", "no market snapshot, stale", Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap());
        v.top4 = vec!["a".into(), "b".into()];
        v
    }

    #[test]
    fn test_csv_header() {
        let header = VerdictLogEntry::csv_header();
        assert!(header.starts_with("sequence,race_id"));
        assert_eq!(header.split(',').count(), 16);
    }

    #[test]
    fn test_csv_row_quotes_reason() {
        let row = VerdictLogEntry::from(&verdict()).to_csv_row();
        assert!(row.contains("SUPPRESS"));
        assert!(row.contains("a|b"));
        assert!(row.ends_with("\"no market snapshot, stale\""));
    }

    #[test]
    fn test_logger_appends_rows() {
        let temp_path = "/tmp/test_verdicts_append.csv";
        let _ = fs::remove_file(temp_path);

        let logger = VerdictLogger::new(temp_path).unwrap();
        assert_eq!(logger.log_verdict(&verdict()).unwrap(), 1);
        assert_eq!(logger.log_verdict(&verdict()).unwrap(), 2);
        assert_eq!(logger.entries_logged(), 2);

        let content = fs::read_to_string(temp_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("2,R1,"));

        // Reopening keeps the existing header
        drop(logger);
        let _logger = VerdictLogger::new(temp_path).unwrap();
        let content = fs::read_to_string(temp_path).unwrap();
        assert_eq!(content.matches("sequence,race_id").count(), 1);

        let _ = fs::remove_file(temp_path);
    }
}
