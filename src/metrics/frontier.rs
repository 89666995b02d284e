//! Frontier Phase Metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct FrontierMetrics;

impl FrontierMetrics {
    pub fn record_enqueued() {
        ::metrics::counter!(phase_metric!(counter, "frontier", "urls_enqueued")).increment(1);
    }

    pub fn record_claimed(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "frontier", "urls_claimed")).increment(count as u64);
    }

    pub fn record_processed() {
        ::metrics::counter!(phase_metric!(counter, "frontier", "urls_processed")).increment(1);
    }

    pub fn record_released() {
        ::metrics::counter!(phase_metric!(counter, "frontier", "urls_released")).increment(1);
    }
}

impl PhaseMetrics for FrontierMetrics {
    fn register_metrics() {
        use metrics::counter;

        let _ = counter!(phase_metric!(counter, "frontier", "urls_enqueued"));
        let _ = counter!(phase_metric!(counter, "frontier", "urls_claimed"));
        let _ = counter!(phase_metric!(counter, "frontier", "urls_processed"));
        let _ = counter!(phase_metric!(counter, "frontier", "urls_released"));
    }

    fn phase_name() -> &'static str {
        "frontier"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "frontier", "urls_enqueued"),
                metric_type: MetricType::Counter,
                help: "Candidate URLs newly inserted into the frontier",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "frontier", "urls_claimed"),
                metric_type: MetricType::Counter,
                help: "Candidate URLs claimed by workers",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "frontier", "urls_processed"),
                metric_type: MetricType::Counter,
                help: "Candidate URLs marked processed, successful or not",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "frontier", "urls_released"),
                metric_type: MetricType::Counter,
                help: "Claims returned without processing (cancellation or transient failure)",
                labels: vec![],
            },
        ]
    }
}
