//! Prometheus metrics for the recruitment engine
//!
//! This module provides metrics tracking for:
//! - API gateway: requests per category and outcome, latency
//! - Recruitment: telegrams sent, status transitions, pool sizes
//! - Dump cache: refresh results and snapshot size
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

use crate::models::NationStatus;
use crate::storage::StoreStats;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for gateway metrics
struct ApiMetrics {
    requests: CounterVec,
    duration: HistogramVec,
}

/// Container for engine and dump metrics
struct EngineMetrics {
    telegrams: CounterVec,
    transitions: CounterVec,
    pool_size: GaugeVec,
    dump_refreshes: CounterVec,
    dump_nations: Gauge,
    dump_regions: Gauge,
}

/// Global storage for gateway metrics
static API_METRICS: OnceLock<ApiMetrics> = OnceLock::new();

/// Global storage for engine metrics
static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = nsrecruit::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let api = ApiMetrics {
        requests: register_counter_vec!(
            "nsrecruit_api_requests_total",
            "NationStates API requests by action category and outcome",
            &["category", "outcome"]
        )?,
        duration: register_histogram_vec!(
            "nsrecruit_api_request_duration_seconds",
            "NationStates API request duration in seconds",
            &["category"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
    };

    let engine = EngineMetrics {
        telegrams: register_counter_vec!(
            "nsrecruit_recruitment_telegrams_total",
            "Recruitment telegram attempts by outcome",
            &["outcome"]
        )?,
        transitions: register_counter_vec!(
            "nsrecruit_status_transitions_total",
            "Candidate status transitions by target status",
            &["status"]
        )?,
        pool_size: register_gauge_vec!(
            "nsrecruit_candidates",
            "Candidates in the store by status",
            &["status"]
        )?,
        dump_refreshes: register_counter_vec!(
            "nsrecruit_dump_refreshes_total",
            "Daily dump refresh attempts by result",
            &["result"]
        )?,
        dump_nations: register_gauge!(
            "nsrecruit_dump_nations",
            "Nations in the current dump snapshot"
        )?,
        dump_regions: register_gauge!(
            "nsrecruit_dump_regions",
            "Regions in the current dump snapshot"
        )?,
    };

    API_METRICS.set(api).map_err(|_| "API metrics already initialized")?;
    ENGINE_METRICS.set(engine).map_err(|_| "Engine metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    API_METRICS.get().is_some() && ENGINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one API request
pub fn record_api_request(category: &str, outcome: &str, duration_secs: f64) {
    let Some(m) = API_METRICS.get() else {
        return;
    };

    m.requests.with_label_values(&[category, outcome]).inc();
    m.duration
        .with_label_values(&[category])
        .observe(duration_secs);
}

/// Record a recruitment telegram attempt (`queued`, `rejected`, `transport`)
pub fn record_telegram(outcome: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.telegrams.with_label_values(&[outcome]).inc();
    }
}

/// Record a committed status transition
pub fn record_transition(status: NationStatus) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.transitions.with_label_values(&[status.as_str()]).inc();
    }
}

/// Publish per-status candidate counts
pub fn update_pool_sizes(stats: &StoreStats) {
    let Some(m) = ENGINE_METRICS.get() else {
        return;
    };

    for status in NationStatus::ALL {
        m.pool_size
            .with_label_values(&[status.as_str()])
            .set(stats.get(status) as f64);
    }
}

/// Record a dump refresh; sizes are only published on success
pub fn record_dump_refresh(success: bool, nations: usize, regions: usize) {
    let Some(m) = ENGINE_METRICS.get() else {
        return;
    };

    if success {
        m.dump_refreshes.with_label_values(&["success"]).inc();
        m.dump_nations.set(nations as f64);
        m.dump_regions.set(regions as f64);
    } else {
        m.dump_refreshes.with_label_values(&["failure"]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
