//! Structured rule conditions
//!
//! Each condition is a small tagged predicate checked against one race field.
//! Definitions are validated when the library loads, so matching is total.

use serde::{Deserialize, Serialize};

use crate::error::RuleLoadError;
use crate::types::{normalize_label, DistanceBucket, FieldSizeBucket, RaceContext};

const DISTANCE_BUCKETS: [&str; 4] = ["sprint", "mile", "middle", "staying"];
const FIELD_SIZE_BUCKETS: [&str; 3] = ["small", "medium", "large"];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    Any,
    Equals { value: String },
    OneOf { values: Vec<String> },
    /// Inclusive on both ends; only legal on numeric fields
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    /// Free-form label (course, going, class)
    Label,
    /// Numeric value with named buckets
    Bucketed(&'static [&'static str]),
}

impl Predicate {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Predicate::Any)
    }

    fn validate(&self, rule_id: &str, field: &'static str, kind: FieldKind) -> Result<(), RuleLoadError> {
        let invalid = |reason: String| RuleLoadError::InvalidCondition {
            rule_id: rule_id.to_string(),
            field,
            reason,
        };

        let check_label = |value: &str| -> Result<(), RuleLoadError> {
            let label = normalize_label(value);
            if label.is_empty() {
                return Err(invalid("empty label".to_string()));
            }
            if let FieldKind::Bucketed(buckets) = kind {
                if !buckets.contains(&label.as_str()) {
                    return Err(invalid(format!("unknown bucket '{}' (expected one of {:?})", label, buckets)));
                }
            }
            Ok(())
        };

        match self {
            Predicate::Any => Ok(()),
            Predicate::Equals { value } => check_label(value),
            Predicate::OneOf { values } => {
                if values.is_empty() {
                    return Err(invalid("one_of with no values".to_string()));
                }
                values.iter().try_for_each(|v| check_label(v))
            }
            Predicate::Range { min, max } => {
                if kind == FieldKind::Label {
                    return Err(invalid("range on a non-numeric field".to_string()));
                }
                if min.is_none() && max.is_none() {
                    return Err(invalid("range with neither min nor max".to_string()));
                }
                if min.iter().chain(max.iter()).any(|v| !v.is_finite()) {
                    return Err(invalid("non-finite range bound".to_string()));
                }
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(invalid(format!("min {} above max {}", lo, hi)));
                    }
                }
                Ok(())
            }
        }
    }

    /// Match a label field; a missing label only satisfies the wildcard
    fn matches_label(&self, label: Option<&str>) -> bool {
        match (self, label) {
            (Predicate::Any, _) => true,
            (_, None) => false,
            (Predicate::Equals { value }, Some(label)) => normalize_label(value) == label,
            (Predicate::OneOf { values }, Some(label)) => values.iter().any(|v| normalize_label(v) == label),
            (Predicate::Range { .. }, Some(_)) => false,
        }
    }

    /// Match a bucketed numeric field by bucket label or by raw value range
    fn matches_bucketed(&self, bucket: &str, value: f64) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::Equals { value: wanted } => normalize_label(wanted) == bucket,
            Predicate::OneOf { values } => values.iter().any(|v| normalize_label(v) == bucket),
            Predicate::Range { min, max } => {
                min.map_or(true, |lo| value >= lo) && max.map_or(true, |hi| value <= hi)
            }
        }
    }
}

/// Conditions over the race context buckets; all must hold for a rule to match
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConditions {
    pub course: Predicate,
    /// Bucket label (sprint/mile/middle/staying) or furlong range
    pub distance: Predicate,
    pub going: Predicate,
    /// Bucket label (small/medium/large) or runner-count range
    pub field_size: Predicate,
    pub class: Predicate,
}

impl RuleConditions {
    pub fn validate(&self, rule_id: &str) -> Result<(), RuleLoadError> {
        self.course.validate(rule_id, "course", FieldKind::Label)?;
        self.distance.validate(rule_id, "distance", FieldKind::Bucketed(&DISTANCE_BUCKETS))?;
        self.going.validate(rule_id, "going", FieldKind::Label)?;
        self.field_size.validate(rule_id, "field_size", FieldKind::Bucketed(&FIELD_SIZE_BUCKETS))?;
        self.class.validate(rule_id, "class", FieldKind::Label)?;
        Ok(())
    }

    pub fn matches(&self, ctx: &RaceContext) -> bool {
        let course = ctx.course_label();
        let going = ctx.going_label();
        let class = ctx.class_label();
        let distance: DistanceBucket = ctx.distance_bucket();
        let field: FieldSizeBucket = ctx.field_size_bucket();

        self.course.matches_label(Some(&course))
            && self.distance.matches_bucketed(distance.as_str(), ctx.distance_furlongs)
            && self.going.matches_label(Some(&going))
            && self.field_size.matches_bucketed(field.as_str(), ctx.field_size as f64)
            && self.class.matches_label(class.as_deref())
    }

    /// Number of non-wildcard predicates
    pub fn specificity(&self) -> usize {
        [&self.course, &self.distance, &self.going, &self.field_size, &self.class]
            .iter()
            .filter(|p| !p.is_wildcard())
            .count()
    }
}
