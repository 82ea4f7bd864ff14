//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define container metrics (constructions, closer failures, state, cron)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `servekit_resource_constructions_total` (counter): successful constructions by family
//! - `servekit_resource_construction_failures_total` (counter): failed constructions by family
//! - `servekit_closer_failures_total` (counter): closers that returned an error
//! - `servekit_lifecycle_state` (gauge): ordinal of the current lifecycle state
//! - `servekit_cron_runs_total` (counter): cron job starts by job
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels for family and job only

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::lifecycle::LifecycleState;

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_construction(family: &str) {
    ::metrics::counter!("servekit_resource_constructions_total", "family" => family.to_string()).increment(1);
}

pub fn record_construction_failure(family: &str) {
    ::metrics::counter!("servekit_resource_construction_failures_total", "family" => family.to_string())
        .increment(1);
}

pub fn record_closer_failure() {
    ::metrics::counter!("servekit_closer_failures_total").increment(1);
}

pub fn record_lifecycle_state(state: LifecycleState) {
    ::metrics::gauge!("servekit_lifecycle_state").set(state as u8 as f64);
}

pub fn record_cron_run(job: &str) {
    ::metrics::counter!("servekit_cron_runs_total", "job" => job.to_string()).increment(1);
}
