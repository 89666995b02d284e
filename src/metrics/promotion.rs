//! Promotion & Moderation Phase Metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct PromotionMetrics;

impl PromotionMetrics {
    pub fn record_show_change(change: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "promotion", "show_changes"), "change" => change).increment(1);
    }

    pub fn record_venue_created() {
        ::metrics::counter!(phase_metric!(counter, "promotion", "venues_created")).increment(1);
    }

    pub fn record_geocode(resolved: bool) {
        let outcome = if resolved { "resolved" } else { "unresolved" };
        ::metrics::counter!(phase_metric!(counter, "promotion", "geocode_attempts"), "outcome" => outcome)
            .increment(1);
    }

    pub fn record_moderation(action: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "promotion", "moderation_actions"), "action" => action)
            .increment(1);
    }
}

impl PhaseMetrics for PromotionMetrics {
    fn register_metrics() {
        use metrics::counter;

        let _ = counter!(phase_metric!(counter, "promotion", "show_changes"));
        let _ = counter!(phase_metric!(counter, "promotion", "venues_created"));
        let _ = counter!(phase_metric!(counter, "promotion", "geocode_attempts"));
        let _ = counter!(phase_metric!(counter, "promotion", "moderation_actions"));
    }

    fn phase_name() -> &'static str {
        "promotion"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "promotion", "show_changes"),
                metric_type: MetricType::Counter,
                help: "Show records created, updated or skipped by promotion",
                labels: vec!["change"],
            },
            MetricDoc {
                name: phase_metric!(counter, "promotion", "venues_created"),
                metric_type: MetricType::Counter,
                help: "Venues created from parsed schedules",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "promotion", "geocode_attempts"),
                metric_type: MetricType::Counter,
                help: "Best-effort geocoding attempts",
                labels: vec!["outcome"],
            },
            MetricDoc {
                name: phase_metric!(counter, "promotion", "moderation_actions"),
                metric_type: MetricType::Counter,
                help: "Moderator and automatic state transitions applied to shows",
                labels: vec!["action"],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_metrics_documentation() {
        PromotionMetrics::register_metrics();
        let docs = PromotionMetrics::metrics_documentation();
        assert_eq!(docs.len(), 4);
        for doc in docs {
            assert!(doc.name.starts_with("karaoke_promotion_"));
        }
    }
}
