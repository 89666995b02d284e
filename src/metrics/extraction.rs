//! Extraction Phase Metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct ExtractionMetrics;

impl ExtractionMetrics {
    pub fn record_call(profile: &'static str, items: usize, duration_secs: f64, success: bool) {
        let outcome = if success { "success" } else { "error" };
        ::metrics::counter!(
            phase_metric!(counter, "extraction", "provider_calls"),
            "profile" => profile,
            "outcome" => outcome
        )
        .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "extraction", "call_duration_seconds"), "profile" => profile)
            .record(duration_secs);
        ::metrics::histogram!(phase_metric!(histogram, "extraction", "batch_items"), "profile" => profile)
            .record(items as f64);
    }

    pub fn record_retry(profile: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "extraction", "retries"), "profile" => profile).increment(1);
    }

    pub fn record_item_failed(profile: &'static str, failure: &'static str) {
        ::metrics::counter!(
            phase_metric!(counter, "extraction", "items_failed"),
            "profile" => profile,
            "failure" => failure
        )
        .increment(1);
    }

    pub fn record_rate_limit_wait(profile: &'static str, waited_secs: f64) {
        ::metrics::histogram!(phase_metric!(histogram, "extraction", "rate_limit_wait_seconds"), "profile" => profile)
            .record(waited_secs);
    }

    pub fn set_effective_batch_size(profile: &'static str, size: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "extraction", "effective_batch_size"), "profile" => profile)
            .set(size as f64);
    }
}

impl PhaseMetrics for ExtractionMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(phase_metric!(counter, "extraction", "provider_calls"));
        let _ = counter!(phase_metric!(counter, "extraction", "retries"));
        let _ = counter!(phase_metric!(counter, "extraction", "items_failed"));
        let _ = histogram!(phase_metric!(histogram, "extraction", "call_duration_seconds"));
        let _ = histogram!(phase_metric!(histogram, "extraction", "batch_items"));
        let _ = histogram!(phase_metric!(histogram, "extraction", "rate_limit_wait_seconds"));
        let _ = gauge!(phase_metric!(gauge, "extraction", "effective_batch_size"));
    }

    fn phase_name() -> &'static str {
        "extraction"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "extraction", "provider_calls"),
                metric_type: MetricType::Counter,
                help: "Calls made to the generative-model provider",
                labels: vec!["profile", "outcome"],
            },
            MetricDoc {
                name: phase_metric!(counter, "extraction", "retries"),
                metric_type: MetricType::Counter,
                help: "Items re-queued after a transient provider error",
                labels: vec!["profile"],
            },
            MetricDoc {
                name: phase_metric!(counter, "extraction", "items_failed"),
                metric_type: MetricType::Counter,
                help: "Items that ended in a provider or malformed-output failure",
                labels: vec!["profile", "failure"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "extraction", "call_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Provider round-trip time in seconds",
                labels: vec!["profile"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "extraction", "batch_items"),
                metric_type: MetricType::Histogram,
                help: "Items coalesced into one provider call",
                labels: vec!["profile"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "extraction", "rate_limit_wait_seconds"),
                metric_type: MetricType::Histogram,
                help: "Time spent waiting on the profile token bucket",
                labels: vec!["profile"],
            },
            MetricDoc {
                name: phase_metric!(gauge, "extraction", "effective_batch_size"),
                metric_type: MetricType::Gauge,
                help: "Batch size currently used after latency adaptation",
                labels: vec!["profile"],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_metrics_documentation() {
        ExtractionMetrics::register_metrics();
        let docs = ExtractionMetrics::metrics_documentation();
        assert_eq!(docs.len(), 7);
        for doc in docs {
            assert!(doc.name.starts_with("karaoke_extraction_"));
        }
    }
}
