//! Per-day API call accounting.
//!
//! Every AI call and every fetch lands here. The daily aggregate is persisted
//! through [`Storage::record_api_call`]; a rolling window of recent latencies
//! per endpoint class is kept in memory and drives batch-size adaptation.

use crate::domain::{ApiMetricsDaily, EndpointClass, FixedMillis};
use crate::error::Result;
use crate::storage::Storage;
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

pub struct MetricsAccountant {
    storage: Arc<dyn Storage>,
    window: usize,
    recent: Mutex<HashMap<EndpointClass, VecDeque<FixedMillis>>>,
}

impl MetricsAccountant {
    pub fn new(storage: Arc<dyn Storage>, window: usize) -> Self {
        Self {
            storage,
            window: window.max(1),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Record one completed call. Storage failures are logged, never returned:
    /// accounting must not fail the work it observes.
    pub async fn record(&self, class: EndpointClass, latency: Duration, success: bool) {
        let sample = FixedMillis::from_duration(latency);
        self.push_recent(class, sample);

        let today = Utc::now().date_naive();
        match self.storage.record_api_call(today, class, sample, success).await {
            Ok(row) => debug!(
                endpoint = %class,
                requests = row.request_count,
                avg_ms = %row.avg_response_time,
                "Recorded api call"
            ),
            Err(e) => warn!(endpoint = %class, "Failed to record api call metrics: {}", e),
        }
    }

    fn push_recent(&self, class: EndpointClass, sample: FixedMillis) {
        let Ok(mut recent) = self.recent.lock() else {
            return;
        };
        let samples = recent.entry(class).or_default();
        samples.push_back(sample);
        while samples.len() > self.window {
            samples.pop_front();
        }
    }

    /// Mean latency over the rolling window, if any calls were seen
    pub fn rolling_average(&self, class: EndpointClass) -> Option<FixedMillis> {
        let recent = self.recent.lock().ok()?;
        let samples = recent.get(&class)?;
        if samples.is_empty() {
            return None;
        }
        let total: i128 = samples.iter().map(|s| s.raw() as i128).sum();
        let avg = total / samples.len() as i128;
        Some(FixedMillis::from_raw(i64::try_from(avg).unwrap_or(i64::MAX)))
    }

    fn sample_count(&self, class: EndpointClass) -> usize {
        self.recent
            .lock()
            .ok()
            .and_then(|r| r.get(&class).map(|s| s.len()))
            .unwrap_or(0)
    }

    /// Batch size to use for a profile given recent latency.
    ///
    /// Latency counts as sustained once at least half the window is filled.
    /// While the rolling mean is above `threshold` the batch is halved
    /// (never below one); otherwise the configured size applies.
    pub fn effective_batch_size(&self, class: EndpointClass, configured: usize, threshold: Duration) -> usize {
        let configured = configured.max(1);
        if self.sample_count(class) * 2 < self.window {
            return configured;
        }
        match self.rolling_average(class) {
            Some(avg) if avg > FixedMillis::from_duration(threshold) => (configured / 2).max(1),
            _ => configured,
        }
    }

    pub async fn daily(&self, date: NaiveDate, class: EndpointClass) -> Result<Option<ApiMetricsDaily>> {
        self.storage.get_api_metrics(date, class).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    #[tokio::test]
    async fn test_record_persists_daily_aggregate() {
        let accountant = MetricsAccountant::new(Arc::new(InMemoryStorage::new()), 4);
        accountant.record(EndpointClass::AiText, Duration::from_millis(100), true).await;
        accountant.record(EndpointClass::AiText, Duration::from_millis(300), false).await;

        let row = accountant
            .daily(Utc::now().date_naive(), EndpointClass::AiText)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.request_count, 2);
        assert_eq!(row.error_count, 1);
        assert_eq!(row.avg_response_time.to_string(), "200.0000");
    }

    #[tokio::test]
    async fn test_batch_size_shrinks_under_sustained_latency_and_recovers() {
        let accountant = MetricsAccountant::new(Arc::new(InMemoryStorage::new()), 4);
        let threshold = Duration::from_millis(1_000);

        accountant.record(EndpointClass::AiWorker, Duration::from_millis(5_000), true).await;
        // one sample is not sustained
        assert_eq!(accountant.effective_batch_size(EndpointClass::AiWorker, 8, threshold), 8);

        accountant.record(EndpointClass::AiWorker, Duration::from_millis(5_000), true).await;
        assert_eq!(accountant.effective_batch_size(EndpointClass::AiWorker, 8, threshold), 4);

        for _ in 0..4 {
            accountant.record(EndpointClass::AiWorker, Duration::from_millis(50), true).await;
        }
        assert_eq!(accountant.effective_batch_size(EndpointClass::AiWorker, 8, threshold), 8);
    }

    #[tokio::test]
    async fn test_classes_are_tracked_separately() {
        let accountant = MetricsAccountant::new(Arc::new(InMemoryStorage::new()), 2);
        accountant.record(EndpointClass::AiVision, Duration::from_secs(60), true).await;
        accountant.record(EndpointClass::AiVision, Duration::from_secs(60), true).await;
        assert_eq!(
            accountant.effective_batch_size(EndpointClass::AiText, 4, Duration::from_secs(1)),
            4
        );
        assert_eq!(
            accountant.effective_batch_size(EndpointClass::AiVision, 4, Duration::from_secs(1)),
            2
        );
    }
}
