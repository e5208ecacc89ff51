//! 📊 Prometheus metrics for the verdict engine
//!
//! A single registry lives in a lazy static; the recording helpers below are
//! safe to call from any thread. `start_metrics_server` exposes `/metrics`
//! and `/health` over HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use log::{error, info};
use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::error::PipelineError;
use crate::learning::LearningStatus;
use crate::types::Chassis;

static METRICS: Lazy<Arc<EngineMetrics>> = Lazy::new(|| Arc::new(EngineMetrics::new()));

pub struct EngineMetrics {
    registry: Registry,

    /// Verdicts by chassis
    pub verdicts_total: IntCounterVec,
    /// Runs that ended without a verdict, by error kind
    pub pipeline_aborts_total: IntCounterVec,
    pub stale_input_suppressions: IntCounter,
    pub win_suppressions: IntCounter,

    pub learning_outcomes_total: IntCounterVec,
    /// Evidence updates by direction (improved / not_improved)
    pub evidence_updates_total: IntCounterVec,
    pub rules_rejected_total: IntCounter,

    pub pipeline_latency: Histogram,
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let metric = IntCounterVec::new(Opts::new(name, help), labels).expect("valid metric definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("metric registered once");
    metric
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let metric = IntCounter::with_opts(Opts::new(name, help)).expect("valid metric definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("metric registered once");
    metric
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let verdicts_total = counter_vec(&registry, "verdict_engine_verdicts_total", "Verdicts produced", &["chassis"]);
        let pipeline_aborts_total = counter_vec(
            &registry,
            "verdict_engine_pipeline_aborts_total",
            "Pipeline runs aborted without a verdict",
            &["kind"],
        );
        let stale_input_suppressions = counter(
            &registry,
            "verdict_engine_stale_input_suppressions_total",
            "SUPPRESS verdicts caused by missing or stale inputs",
        );
        let win_suppressions = counter(
            &registry,
            "verdict_engine_win_suppressions_total",
            "Verdicts with the win bet suppressed",
        );

        let learning_outcomes_total = counter_vec(
            &registry,
            "verdict_engine_learning_outcomes_total",
            "Learning gate outcomes",
            &["status"],
        );
        let evidence_updates_total = counter_vec(
            &registry,
            "verdict_engine_evidence_updates_total",
            "Rule evidence updates applied",
            &["direction"],
        );
        let rules_rejected_total = counter(
            &registry,
            "verdict_engine_rules_rejected_total",
            "Rule definitions rejected at load time",
        );

        let pipeline_latency = Histogram::with_opts(
            HistogramOpts::new("verdict_engine_pipeline_latency_seconds", "Per-race pipeline latency")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )
        .expect("valid metric definition");
        registry
            .register(Box::new(pipeline_latency.clone()))
            .expect("metric registered once");

        Self {
            registry,
            verdicts_total,
            pipeline_aborts_total,
            stale_input_suppressions,
            win_suppressions,
            learning_outcomes_total,
            evidence_updates_total,
            rules_rejected_total,
            pipeline_latency,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub fn metrics() -> Arc<EngineMetrics> {
    METRICS.clone()
}

pub fn init_metrics() {
    let _ = METRICS.clone();
    info!("📊 Metrics system initialized");
}

pub async fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler));

    let listener = TcpListener::bind(&addr).await?;
    info!("📊 Metrics server listening on http://{}", addr);
    info!("  • Metrics endpoint: http://{}/metrics", addr);
    info!("  • Health endpoint: http://{}/health", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn encode() -> Result<String, prometheus::Error> {
    prometheus::TextEncoder::new().encode_to_string(&METRICS.registry().gather())
}

async fn metrics_handler() -> Response {
    match encode() {
        Ok(body) => (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}

async fn health_handler() -> Response {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"healthy","service":"verdict-engine"}"#,
    )
        .into_response()
}

// ============================================================================
// Recording helpers
// ============================================================================

pub fn record_verdict(chassis: Chassis, win_suppressed: bool, stale_inputs: bool, elapsed: Duration) {
    let m = metrics();
    m.verdicts_total.with_label_values(&[chassis.as_str()]).inc();
    if win_suppressed {
        m.win_suppressions.inc();
    }
    if stale_inputs {
        m.stale_input_suppressions.inc();
    }
    m.pipeline_latency.observe(elapsed.as_secs_f64());
}

pub fn record_abort(error: &PipelineError) {
    let kind = match error {
        PipelineError::InsufficientMarketData { .. } => "insufficient_market_data",
        PipelineError::MalformedRaceContext { .. } => "malformed_race_context",
        PipelineError::StaleSignal { .. } => "stale_signal",
    };
    metrics().pipeline_aborts_total.with_label_values(&[kind]).inc();
}

pub fn record_learning_outcome(status: LearningStatus) {
    metrics()
        .learning_outcomes_total
        .with_label_values(&[status.as_str()])
        .inc();
}

pub fn record_evidence_update(improved: bool) {
    let direction = if improved { "improved" } else { "not_improved" };
    metrics().evidence_updates_total.with_label_values(&[direction]).inc();
}

pub fn record_rules_rejected(count: usize) {
    metrics().rules_rejected_total.inc_by(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_are_exported() {
        record_verdict(Chassis::WinOverlay, false, false, Duration::from_micros(250));
        record_abort(&PipelineError::InsufficientMarketData { race_id: "R1".into(), priced: 1 });
        record_learning_outcome(LearningStatus::Quarantined);
        record_evidence_update(true);

        let body = encode().unwrap();
        assert!(body.contains("verdict_engine_verdicts_total{chassis=\"WIN_OVERLAY\"}"));
        assert!(body.contains("insufficient_market_data"));
        assert!(body.contains("status=\"QUARANTINED\""));
        assert!(body.contains("verdict_engine_pipeline_latency_seconds_bucket"));
    }

    #[test]
    fn test_fresh_registry_is_independent() {
        let local = EngineMetrics::new();
        local.verdicts_total.with_label_values(&["SUPPRESS"]).inc();
        assert_eq!(local.verdicts_total.with_label_values(&["SUPPRESS"]).get(), 1);
    }
}
