//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_source_state` (gauge): 0=connecting 1=loaded 2=watching 3=closed
//! - `config_watch_events_total` (counter): backend events by outcome
//! - `config_watch_failures_total` / `config_watch_reconnects_total` (counters)
//! - `config_stream_dropped_total` (counter): values overwritten in a full channel
//! - `config_stream_stale_total` (counter): events at or below the last revision
//! - `resource_pool_size` (gauge): live named resources
//! - `resource_changes_total` (counter): added / rebuilt / released by action
//! - `resource_build_failures_total` (counter)
//! - `config_reconcile_duration_seconds` (histogram)
//!
//! Recording is a no-op until a recorder is installed, so library users
//! pay nothing unless they call [`init_metrics`].

use std::net::SocketAddr;
use std::time::Instant;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::source::types::SourceState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_source_state(kind: &'static str, state: SourceState) {
    gauge!("config_source_state", "kind" => kind).set(state as u8 as f64);
}

pub fn record_watch_event(outcome: &'static str) {
    counter!("config_watch_events_total", "outcome" => outcome).increment(1);
}

pub fn record_watch_failure() {
    counter!("config_watch_failures_total").increment(1);
}

pub fn record_watch_reconnect() {
    counter!("config_watch_reconnects_total").increment(1);
}

pub fn record_stream_dropped(count: u64) {
    counter!("config_stream_dropped_total").increment(count);
}

pub fn record_stream_stale() {
    counter!("config_stream_stale_total").increment(1);
}

pub fn record_pool_size(size: usize) {
    gauge!("resource_pool_size").set(size as f64);
}

pub fn record_resource_change(action: &'static str, count: usize) {
    if count > 0 {
        counter!("resource_changes_total", "action" => action).increment(count as u64);
    }
}

pub fn record_build_failure() {
    counter!("resource_build_failures_total").increment(1);
}

pub fn record_reconcile(start: Instant) {
    histogram!("config_reconcile_duration_seconds").record(start.elapsed().as_secs_f64());
}
