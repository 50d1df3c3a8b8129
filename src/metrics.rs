//! Metrics for cluster-updater observability
//!
//! Provides OpenTelemetry metrics for:
//! - Update steps (outcome and component kind)
//! - Update call duration
//! - Update failures by error type
//! - Driver ticks
//!
//! Instruments record into the global meter provider, which exports over
//! OTLP once [`crate::telemetry::init_telemetry`] is given an endpoint.

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::controller::UpdateOutcome;
use crate::Error;

/// Global meter for cluster-updater metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("cluster_updater"));

// ============================================================================
// Update Metrics
// ============================================================================

/// Counter of completed update calls
///
/// Labels:
/// - `outcome`: updated, in_progress, converged
/// - `kind`: Node, DaemonSet, Deployment (absent for converged)
pub static UPDATE_STEPS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("cluster_updater_update_steps_total")
        .with_description("Total number of completed update calls by outcome")
        .with_unit("{steps}")
        .build()
});

/// Histogram of update call duration
///
/// Labels:
/// - `result`: success, error
pub static UPDATE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("cluster_updater_update_duration_seconds")
        .with_description("Duration of update calls in seconds")
        .with_unit("s")
        .build()
});

/// Counter of failed update calls
///
/// Labels:
/// - `error_type`: see [`error_type`]
pub static UPDATE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("cluster_updater_update_errors_total")
        .with_description("Total number of failed update calls")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Driver Metrics
// ============================================================================

/// Counter of driver ticks
///
/// Labels:
/// - `result`: skipped, ran, error
pub static DRIVER_TICKS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("cluster_updater_driver_ticks_total")
        .with_description("Total number of driver ticks by result")
        .with_unit("{ticks}")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Labels for driver tick results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// No desired version was configured
    Skipped,
    /// The controller ran successfully
    Ran,
    /// Reading the desired version or running the controller failed
    Error,
}

impl TickResult {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Ran => "ran",
            Self::Error => "error",
        }
    }
}

/// Label value classifying an error
pub fn error_type(err: &Error) -> &'static str {
    match err {
        Error::Kube { .. } => "kube",
        Error::CacheNotSynced { .. } => "cache_not_synced",
        Error::CatalogBuild { .. } => "catalog_build",
        Error::InvalidVersion { .. } => "invalid_version",
        Error::VersionUnavailable { .. } => "version_unavailable",
        Error::NoComponents => "no_components",
        Error::ComponentUpdate { .. } => "component_update",
        Error::Config { .. } => "config",
    }
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record an update call with timing
pub struct UpdateTimer {
    start: Instant,
}

impl UpdateTimer {
    /// Start timing an update call
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self, outcome: &UpdateOutcome) {
        let duration = self.start.elapsed().as_secs_f64();
        UPDATE_DURATION.record(duration, &[KeyValue::new("result", "success")]);

        let mut labels = vec![KeyValue::new("outcome", outcome.as_str())];
        if let Some(kind) = outcome.kind() {
            labels.push(KeyValue::new("kind", kind.to_string()));
        }
        UPDATE_STEPS.add(1, &labels);
    }

    /// Record error completion
    pub fn error(self, err: &Error) {
        let duration = self.start.elapsed().as_secs_f64();
        UPDATE_DURATION.record(duration, &[KeyValue::new("result", "error")]);

        let mut labels = vec![KeyValue::new("error_type", error_type(err))];
        if let Error::ComponentUpdate { kind, .. } = err {
            labels.push(KeyValue::new("kind", kind.to_string()));
        }
        UPDATE_ERRORS.add(1, &labels);
    }
}

/// Record a driver tick
pub fn record_tick(result: TickResult) {
    DRIVER_TICKS.add(1, &[KeyValue::new("result", result.as_str())]);
}
