//! Fetch Phase Metrics
//!
//! Request counts and latency per fetch strategy, plus a counter per distinct
//! failure kind so blocked, timed-out and broken pages can be told apart.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct FetchMetrics;

impl FetchMetrics {
    pub fn record_success(strategy: &'static str, duration_secs: f64, body_bytes: usize) {
        ::metrics::counter!(phase_metric!(counter, "fetch", "requests_success"), "strategy" => strategy)
            .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "fetch", "duration_seconds"), "strategy" => strategy)
            .record(duration_secs);
        ::metrics::histogram!(phase_metric!(histogram, "fetch", "body_bytes")).record(body_bytes as f64);
    }

    pub fn record_failure(strategy: &'static str, failure: &'static str) {
        ::metrics::counter!(
            phase_metric!(counter, "fetch", "requests_failed"),
            "strategy" => strategy,
            "failure" => failure
        )
        .increment(1);
    }

    pub fn record_url_transformed() {
        ::metrics::counter!(phase_metric!(counter, "fetch", "urls_transformed")).increment(1);
    }

    pub fn record_render_upgrade() {
        ::metrics::counter!(phase_metric!(counter, "fetch", "render_upgrades")).increment(1);
    }
}

impl PhaseMetrics for FetchMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "fetch", "requests_success"));
        let _ = counter!(phase_metric!(counter, "fetch", "requests_failed"));
        let _ = counter!(phase_metric!(counter, "fetch", "urls_transformed"));
        let _ = counter!(phase_metric!(counter, "fetch", "render_upgrades"));
        let _ = histogram!(phase_metric!(histogram, "fetch", "duration_seconds"));
        let _ = histogram!(phase_metric!(histogram, "fetch", "body_bytes"));
    }

    fn phase_name() -> &'static str {
        "fetch"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "fetch", "requests_success"),
                metric_type: MetricType::Counter,
                help: "Successful page fetches",
                labels: vec!["strategy"],
            },
            MetricDoc {
                name: phase_metric!(counter, "fetch", "requests_failed"),
                metric_type: MetricType::Counter,
                help: "Failed page fetches by failure kind",
                labels: vec!["strategy", "failure"],
            },
            MetricDoc {
                name: phase_metric!(counter, "fetch", "urls_transformed"),
                metric_type: MetricType::Counter,
                help: "Social profile URLs rewritten to their canonical page form",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "fetch", "render_upgrades"),
                metric_type: MetricType::Counter,
                help: "Static fetches re-run through the headless renderer",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "fetch", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Fetch duration in seconds",
                labels: vec!["strategy"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "fetch", "body_bytes"),
                metric_type: MetricType::Histogram,
                help: "Size of fetched bodies in bytes",
                labels: vec![],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_metrics_documentation() {
        FetchMetrics::register_metrics();
        let docs = FetchMetrics::metrics_documentation();
        assert_eq!(docs.len(), 6);
        for doc in docs {
            assert!(doc.name.starts_with("karaoke_fetch_"));
        }
    }
}
