//! 🏇 Verdict Engine - race verdict pipeline
//!
//! Turns one race's context, market snapshot and runner signals into a single
//! immutable verdict, and feeds settled results back into an evidence-tracked
//! rule library.
//!
//! ## Pipeline
//! - ConcentrationClassifier: chaos level and mode of the market
//! - MarketRoleClassifier: ANCHOR / RELEASE / NOISE per runner
//! - RuleEngine: matching rules with Beta-posterior confidence
//! - AdversarialReviewer: red-team pass on the candidate selection
//! - DecisionPolicy: chassis, top-4, fades and the win overlay
//! - LearningGate: COMMITTED / QUARANTINED / REJECTED, at most once per race

pub mod config;
pub mod db;
pub mod decision_engine;
pub mod error;
pub mod learning;
pub mod market;
pub mod metrics;
pub mod rules;
pub mod types;

pub use config::Config;
pub use db::{Database, VerdictAlreadyRecorded};
pub use decision_engine::{RacePipeline, Verdict, VerdictLogger};
pub use error::{PipelineError, RuleLoadError, RuleStoreError};
pub use learning::{LearningGate, LearningOutcome, LearningStatus, OutcomeLedger};
pub use rules::{RuleEngine, RuleStore};
