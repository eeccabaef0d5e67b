//! # Metrics
//!
//! Prometheus counters, gauges and histograms recorded through the `metrics` facade.
//!
//! Recording is lock-free. The global Prometheus recorder is installed once per process and
//! rendered by the `/metrics` route.
//!
//! ## Label Interning
//!
//! Upstream endpoints are interned to `&'static str` to avoid per-event allocations. The set
//! of endpoints is fixed at startup, so the pool stays small.

use crate::{events::EventTopic, upstream::errors::SubscriptionFailure};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{borrow::Cow, sync::OnceLock};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

static UPSTREAM_NAME_POOL: OnceLock<dashmap::DashMap<String, &'static str>> = OnceLock::new();

#[inline]
fn upstream_to_static(upstream: &str) -> Cow<'static, str> {
    let pool = UPSTREAM_NAME_POOL.get_or_init(dashmap::DashMap::new);

    if let Some(interned) = pool.get(upstream) {
        return Cow::Borrowed(*interned);
    }

    let owned = upstream.to_string();
    let leaked: &'static str = Box::leak(owned.clone().into_boxed_str());
    pool.insert(owned, leaked);
    Cow::Borrowed(leaked)
}

/// What happened to an event delivered by an upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// First sighting, handed to subscribers.
    Delivered,
    /// Already seen from another connection.
    Duplicate,
    /// Source connection is currently excluded from the trusted set.
    Excluded,
    /// Frame could not be decoded or named an unknown topic.
    Dropped,
}

impl EventOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Duplicate => "duplicate",
            Self::Excluded => "excluded",
            Self::Dropped => "dropped",
        }
    }
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to install prometheus recorder, metrics will not be exported"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Records relay metrics and renders them in the Prometheus text format.
#[derive(Clone)]
pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self { prometheus_handle: init_prometheus_recorder() }
    }

    /// Records one upstream call made on behalf of a fan-out.
    pub fn record_upstream_call(
        &self,
        operation: &'static str,
        upstream: &str,
        success: bool,
        latency_ms: u64,
    ) {
        let upstream = upstream_to_static(upstream);

        counter!(
            "relay_upstream_calls_total",
            "operation" => operation,
            "upstream" => upstream.clone()
        )
        .increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!(
            "relay_upstream_call_duration_seconds",
            "operation" => operation,
            "upstream" => upstream.clone()
        )
        .record(latency_ms as f64 / 1000.0);

        if !success {
            counter!(
                "relay_upstream_call_errors_total",
                "operation" => operation,
                "upstream" => upstream
            )
            .increment(1);
        }
    }

    /// Records the result of a consensus round: how many answers agreed out of how many.
    pub fn record_consensus(&self, operation: &'static str, agreeing: usize, responses: usize) {
        counter!("relay_fanout_total", "operation" => operation).increment(1);
        if agreeing < responses {
            counter!("relay_fanout_disagreements_total", "operation" => operation).increment(1);
        }
    }

    /// Records a fan-out that produced no answer.
    pub fn record_fanout_failure(&self, operation: &'static str, reason: &'static str) {
        counter!("relay_fanout_failures_total", "operation" => operation, "reason" => reason)
            .increment(1);
    }

    pub fn record_upstream_health(&self, upstream: &str, is_healthy: bool) {
        let health_value = if is_healthy { 1.0 } else { 0.0 };
        gauge!("relay_upstream_health", "upstream" => upstream_to_static(upstream))
            .set(health_value);
    }

    pub fn record_health_check_failure(&self, upstream: &str, error_type: &'static str) {
        counter!(
            "relay_health_check_failures_total",
            "upstream" => upstream_to_static(upstream),
            "error_type" => error_type
        )
        .increment(1);
    }

    /// Records the state of one topic subscription; `1` while subscribed.
    pub fn record_subscription(&self, upstream: &str, topic: EventTopic, subscribed: bool) {
        let value = if subscribed { 1.0 } else { 0.0 };
        gauge!(
            "relay_subscription_active",
            "upstream" => upstream_to_static(upstream),
            "topic" => topic.as_str()
        )
        .set(value);
    }

    pub fn record_subscription_failure(
        &self,
        upstream: &str,
        topic: EventTopic,
        failure: SubscriptionFailure,
    ) {
        counter!(
            "relay_subscription_failures_total",
            "upstream" => upstream_to_static(upstream),
            "topic" => topic.as_str(),
            "class" => failure.as_str()
        )
        .increment(1);
    }

    pub fn record_event(&self, topic: EventTopic, outcome: EventOutcome) {
        counter!("relay_events_total", "topic" => topic.as_str(), "outcome" => outcome.as_str())
            .increment(1);
    }

    /// Records the size of the trusted set and of the exclusion set after a selection pass.
    pub fn record_trusted_set(&self, trusted: usize, excluded: usize) {
        #[allow(clippy::cast_precision_loss)]
        {
            gauge!("relay_trusted_connections").set(trusted as f64);
            gauge!("relay_excluded_connections").set(excluded as f64);
        }
    }

    pub fn record_event_subscribers(&self, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("relay_event_subscribers").set(count as f64);
    }

    /// Renders every recorded metric in the Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}
