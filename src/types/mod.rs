use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::PipelineError;

/// Decimal odds at or below this are not a usable price
const MIN_VALID_PRICE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceBucket {
    Sprint,
    Mile,
    Middle,
    Staying,
}

impl DistanceBucket {
    pub fn from_furlongs(furlongs: f64) -> Self {
        if furlongs < 7.0 {
            DistanceBucket::Sprint
        } else if furlongs < 9.5 {
            DistanceBucket::Mile
        } else if furlongs < 13.0 {
            DistanceBucket::Middle
        } else {
            DistanceBucket::Staying
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceBucket::Sprint => "sprint",
            DistanceBucket::Mile => "mile",
            DistanceBucket::Middle => "middle",
            DistanceBucket::Staying => "staying",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSizeBucket {
    Small,
    Medium,
    Large,
}

impl FieldSizeBucket {
    pub fn from_count(field_size: u32) -> Self {
        match field_size {
            0..=7 => FieldSizeBucket::Small,
            8..=12 => FieldSizeBucket::Medium,
            _ => FieldSizeBucket::Large,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldSizeBucket::Small => "small",
            FieldSizeBucket::Medium => "medium",
            FieldSizeBucket::Large => "large",
        }
    }
}

/// Descriptive context of one race, fixed for the whole pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceContext {
    pub race_id: String,
    pub course: String,
    pub distance_furlongs: f64,
    pub going: String,
    pub field_size: u32,
    #[serde(default)]
    pub class: Option<String>,
}

impl RaceContext {
    /// Reject contexts that cannot enter the pipeline
    pub fn validate(&self) -> Result<(), PipelineError> {
        let malformed = |reason: &str| PipelineError::MalformedRaceContext {
            race_id: self.race_id.clone(),
            reason: reason.to_string(),
        };

        if self.race_id.trim().is_empty() {
            return Err(malformed("empty race id"));
        }
        if self.course.trim().is_empty() {
            return Err(malformed("empty course"));
        }
        if self.going.trim().is_empty() {
            return Err(malformed("empty going"));
        }
        if !self.distance_furlongs.is_finite() || self.distance_furlongs <= 0.0 {
            return Err(malformed(&format!("invalid distance {}", self.distance_furlongs)));
        }
        if self.field_size < 2 {
            return Err(malformed(&format!("field size {} below 2", self.field_size)));
        }
        Ok(())
    }

    pub fn distance_bucket(&self) -> DistanceBucket {
        DistanceBucket::from_furlongs(self.distance_furlongs)
    }

    pub fn field_size_bucket(&self) -> FieldSizeBucket {
        FieldSizeBucket::from_count(self.field_size)
    }

    pub fn course_label(&self) -> String {
        normalize_label(&self.course)
    }

    pub fn going_label(&self) -> String {
        normalize_label(&self.going)
    }

    pub fn class_label(&self) -> Option<String> {
        self.class.as_deref().map(normalize_label)
    }
}

/// Lowercase, trimmed, single-spaced label used for bucket matching
pub fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One runner's prices at the moment the snapshot was taken
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerQuote {
    pub runner_id: String,
    #[serde(default)]
    pub best_back: Option<f64>,
    #[serde(default)]
    pub best_lay: Option<f64>,
    #[serde(default)]
    pub last_traded: Option<f64>,
    #[serde(default)]
    pub traded_volume: Option<f64>,
}

impl RunnerQuote {
    /// Price used for implied probability
    ///
    /// Last traded if valid, else back/lay midpoint, else back, else lay.
    pub fn reference_price(&self) -> Option<f64> {
        let back = self.best_back.filter(|p| is_valid_price(*p));
        let lay = self.best_lay.filter(|p| is_valid_price(*p));

        if let Some(traded) = self.last_traded.filter(|p| is_valid_price(*p)) {
            return Some(traded);
        }
        match (back, lay) {
            (Some(b), Some(l)) => Some((b + l) / 2.0),
            (Some(b), None) => Some(b),
            (None, Some(l)) => Some(l),
            (None, None) => None,
        }
    }

    pub fn volume(&self) -> Option<f64> {
        self.traded_volume.filter(|v| v.is_finite() && *v >= 0.0)
    }
}

pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > MIN_VALID_PRICE
}

/// Market state for one race at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub race_id: String,
    pub captured_at: DateTime<Utc>,
    pub runners: Vec<RunnerQuote>,
}

impl MarketSnapshot {
    pub fn priced_count(&self) -> usize {
        self.runners
            .iter()
            .filter(|r| r.reference_price().is_some())
            .count()
    }

    pub fn quote(&self, runner_id: &str) -> Option<&RunnerQuote> {
        self.runners.iter().find(|r| r.runner_id == runner_id)
    }
}

/// Upstream scores for a single runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSignal {
    pub runner_id: String,
    pub ability: f64,
    pub intent: f64,
    pub behavioral: f64,
    #[serde(default)]
    pub pace_uncertain: bool,
    #[serde(default)]
    pub trip_risk: f64,
}

impl RunnerSignal {
    /// All scores must be finite and inside [0,1]
    pub fn is_in_range(&self) -> bool {
        [self.ability, self.intent, self.behavioral, self.trip_risk]
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
    }
}

/// Every upstream signal for one race
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceSignals {
    pub produced_at: DateTime<Utc>,
    pub runners: Vec<RunnerSignal>,
    #[serde(default)]
    pub manipulation_risk: f64,
}

impl RaceSignals {
    pub fn get(&self, runner_id: &str) -> Option<&RunnerSignal> {
        self.runners.iter().find(|s| s.runner_id == runner_id)
    }
}

/// Everything needed to decide one race
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceInputs {
    pub context: RaceContext,
    #[serde(default)]
    pub snapshot: Option<MarketSnapshot>,
    #[serde(default)]
    pub signals: Option<RaceSignals>,
    pub decision_time: DateTime<Utc>,
}

/// Official result of a race, known after the off
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceResult {
    pub race_id: String,
    #[serde(default)]
    pub finishing_order: Vec<String>,
    #[serde(default)]
    pub void: bool,
    #[serde(default)]
    pub starting_prices: HashMap<String, f64>,
    #[serde(default)]
    pub post_race_manipulation_risk: Option<f64>,
    #[serde(default)]
    pub result_amended: bool,
}

impl RaceResult {
    /// 1-based finishing position
    pub fn position_of(&self, runner_id: &str) -> Option<usize> {
        self.finishing_order
            .iter()
            .position(|r| r == runner_id)
            .map(|idx| idx + 1)
    }

    pub fn winner(&self) -> Option<&str> {
        self.finishing_order.first().map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRole {
    Anchor,
    Release,
    Noise,
}

impl MarketRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRole::Anchor => "ANCHOR",
            MarketRole::Release => "RELEASE",
            MarketRole::Noise => "NOISE",
        }
    }
}

impl fmt::Display for MarketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChaosMode {
    Structure,
    Mixed,
    Chaos,
}

impl ChaosMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChaosMode::Structure => "STRUCTURE",
            ChaosMode::Mixed => "MIXED",
            ChaosMode::Chaos => "CHAOS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Chassis {
    WinOverlay,
    Top4Structure,
    ValueEw,
    Suppress,
}

impl Chassis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chassis::WinOverlay => "WIN_OVERLAY",
            Chassis::Top4Structure => "TOP4_STRUCTURE",
            Chassis::ValueEw => "VALUE_EW",
            Chassis::Suppress => "SUPPRESS",
        }
    }
}

impl fmt::Display for Chassis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
