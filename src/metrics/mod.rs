//! Centralized metrics infrastructure for the scheduling pipeline
//!
//! Each pipeline phase defines its own Prometheus metrics in a dedicated
//! submodule so ownership is clear and names cannot collide. Daily API call
//! accounting, which feeds back into batch sizing, lives in [`accounting`].

pub mod accounting;
pub mod extraction;
pub mod fetch;
pub mod frontier;
pub mod promotion;
pub mod registry;

pub use accounting::MetricsAccountant;
pub use extraction::ExtractionMetrics;
pub use fetch::FetchMetrics;
pub use frontier::FrontierMetrics;
pub use promotion::PromotionMetrics;

use std::sync::{Once, OnceLock};
use tracing::{info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:9898";

/// Initialize the global metrics infrastructure
///
/// Idempotent. Installs a Prometheus recorder with an HTTP listener on
/// `KARAOKE_METRICS_ADDR` (default 127.0.0.1:9898) and registers all phase
/// metrics.
pub fn init_metrics() {
    INIT.call_once(|| {
        let addr_str =
            std::env::var("KARAOKE_METRICS_ADDR").unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string());
        let addr = match addr_str.parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => {
                warn!("Invalid metrics addr '{}', using default {}", addr_str, DEFAULT_METRICS_ADDR);
                std::net::SocketAddr::from(([127, 0, 0, 1], 9898))
            }
        };

        let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install_recorder() {
            Ok(handle) => {
                if HANDLE.set(handle).is_err() {
                    warn!("Prometheus handle was already set");
                }
                info!("Prometheus exporter listening on http://{}/metrics", addr);
                registry::register_all_metrics();
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
            }
        }
    });
}

/// Render the current metrics snapshot, if a recorder is installed
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// Trait for phase-specific metrics collections
pub trait PhaseMetrics {
    /// Register all metrics for this phase so they appear before first use
    fn register_metrics();

    fn phase_name() -> &'static str;

    /// Documentation for every metric in this phase
    fn metrics_documentation() -> Vec<MetricDoc>;
}

/// Documentation for a single metric
#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Builds phase metric names following karaoke_{phase}_{name}[_total]
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("karaoke_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("karaoke_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("karaoke_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

#[cfg(test)]
mod tests {
    #[test]
    fn test_metric_naming_convention() {
        assert_eq!(
            phase_metric!(counter, "fetch", "requests"),
            "karaoke_fetch_requests_total"
        );
        assert_eq!(
            phase_metric!(histogram, "extraction", "call_duration_seconds"),
            "karaoke_extraction_call_duration_seconds"
        );
        assert_eq!(
            phase_metric!(gauge, "extraction", "effective_batch_size"),
            "karaoke_extraction_effective_batch_size"
        );
    }
}
