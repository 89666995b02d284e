//! Registration of every phase's metrics with a single catalog.
//!
//! Metric names are global to the Prometheus recorder, so two phases claiming
//! the same name is reported at start-up.

use super::{ExtractionMetrics, FetchMetrics, FrontierMetrics, MetricDoc, PhaseMetrics, PromotionMetrics};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Metric name -> (owning phase, documentation)
pub type Catalog = BTreeMap<&'static str, (&'static str, MetricDoc)>;

/// Names claimed by more than one phase: (name, first owner, second owner)
pub type Conflict = (&'static str, &'static str, &'static str);

fn add_phase<T: PhaseMetrics>(catalog: &mut Catalog, conflicts: &mut Vec<Conflict>) {
    let phase = T::phase_name();
    for doc in T::metrics_documentation() {
        match catalog.get(doc.name) {
            Some((owner, _)) => conflicts.push((doc.name, owner, phase)),
            None => {
                catalog.insert(doc.name, (phase, doc));
            }
        }
    }
}

/// Documentation for every phase, plus any name conflicts found while merging
pub fn catalog() -> (Catalog, Vec<Conflict>) {
    let mut catalog = Catalog::new();
    let mut conflicts = Vec::new();
    add_phase::<FrontierMetrics>(&mut catalog, &mut conflicts);
    add_phase::<FetchMetrics>(&mut catalog, &mut conflicts);
    add_phase::<ExtractionMetrics>(&mut catalog, &mut conflicts);
    add_phase::<PromotionMetrics>(&mut catalog, &mut conflicts);
    (catalog, conflicts)
}

pub fn register_all_metrics() {
    FrontierMetrics::register_metrics();
    FetchMetrics::register_metrics();
    ExtractionMetrics::register_metrics();
    PromotionMetrics::register_metrics();

    let (catalog, conflicts) = catalog();
    for (name, first, second) in &conflicts {
        warn!(metric = name, first, second, "Metric name claimed by two phases");
    }
    info!(metrics = catalog.len(), "Registered pipeline metrics");

    if std::env::var("KARAOKE_METRICS_DEBUG").is_ok() {
        for (name, (phase, doc)) in &catalog {
            debug!(
                phase,
                kind = ?doc.metric_type,
                labels = %doc.labels.join(","),
                "{}: {}",
                name,
                doc.help
            );
        }
    }
}

/// "karaoke_fetch_requests_total" -> "fetch"
pub fn phase_of(metric_name: &str) -> Option<&str> {
    metric_name
        .strip_prefix("karaoke_")
        .and_then(|rest| rest.split_once('_'))
        .map(|(phase, _)| phase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_of() {
        assert_eq!(phase_of("karaoke_fetch_requests_total"), Some("fetch"));
        assert_eq!(phase_of("karaoke_extraction_call_duration_seconds"), Some("extraction"));
        assert_eq!(phase_of("http_requests_total"), None);
    }

    #[test]
    fn test_catalog_has_no_conflicts_and_names_match_owner() {
        let (catalog, conflicts) = catalog();
        assert!(conflicts.is_empty(), "conflicts: {:?}", conflicts);
        assert!(!catalog.is_empty());
        for (name, (phase, _)) in &catalog {
            assert_eq!(phase_of(name), Some(*phase), "{} filed under {}", name, phase);
        }
    }
}
