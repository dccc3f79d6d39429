//! # Application State Management
//!
//! Shared state accessed by every HTTP handler and every relay actor.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Each actix worker thread builds its own `App`, but all of them hold
//!   clones of the same `AppState`, so counters are process-wide
//!
//! ### Arc<RwLock<T>> Pattern
//! - Metrics are written on every request and every relayed message, and
//!   read by the `/health` endpoint
//! - Locks are held only for the duration of a counter update
//!
//! The configuration never changes after startup, so it sits behind a plain
//! `Arc` with no lock.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state shared across handlers and relay actors.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<RelayMetrics>>,
    pub start_time: Instant,
}

/// Which way a relayed message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

/// Counters collected since the server started.
///
/// ## Fields:
/// - `request_count` / `error_count`: HTTP requests, maintained by the metrics middleware
/// - `active_relays`: client sockets currently paired with an upstream socket
/// - `relays_opened`: total client sockets accepted
/// - `rejected_upgrades`: socket upgrades refused because of their origin
/// - `forwarded_*`: messages relayed verbatim, per direction
/// - `dropped_to_upstream`: client messages dropped because the upstream was not open
#[derive(Debug, Default, Clone)]
pub struct RelayMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_relays: u32,
    pub relays_opened: u64,
    pub rejected_upgrades: u64,
    pub forwarded_to_upstream: u64,
    pub forwarded_to_client: u64,
    pub dropped_to_upstream: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(RelayMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // A panic while holding the lock can only leave a counter mid-increment,
    // so a poisoned lock is still safe to use.
    fn write_metrics(&self) -> RwLockWriteGuard<'_, RelayMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, RelayMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record one finished HTTP request against its endpoint ("GET /api/key").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A client socket was accepted and its upstream connection is starting.
    pub fn relay_opened(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_relays += 1;
        metrics.relays_opened += 1;
    }

    /// A relay pair has shut down. Never underflows.
    pub fn relay_closed(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_relays = metrics.active_relays.saturating_sub(1);
    }

    pub fn upgrade_rejected(&self) {
        self.write_metrics().rejected_upgrades += 1;
    }

    pub fn message_forwarded(&self, direction: Direction) {
        let mut metrics = self.write_metrics();
        match direction {
            Direction::ClientToUpstream => metrics.forwarded_to_upstream += 1,
            Direction::UpstreamToClient => metrics.forwarded_to_client += 1,
        }
    }

    pub fn message_dropped(&self) {
        self.write_metrics().dropped_to_upstream += 1;
    }

    /// Copy of the current counters, taken under a single read lock.
    pub fn get_metrics_snapshot(&self) -> RelayMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
