//! Per-profile request dispatcher.
//!
//! Items submitted for the same profile within `batch_window_ms` are sent as
//! one provider call, up to the profile's effective batch size. Every call
//! first takes a token from the profile's bucket. Transient failures are
//! retried per item with exponential backoff; items that succeed or fail for
//! good are answered immediately and never wait on their siblings' retries.

use super::prompt::{entries_from_output, ExtractionItem};
use super::provider::{GenerativeProvider, ProviderError};
use super::rate_limiter::TokenBucket;
use super::ModelProfile;
use crate::config::{AiConfig, ProfileConfig};
use crate::domain::{EndpointClass, ScheduleEntry};
use crate::error::ProcessingFailure;
use crate::metrics::{ExtractionMetrics, MetricsAccountant};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub type ItemReply = Result<Vec<ScheduleEntry>, ProcessingFailure>;

struct Job {
    item: ExtractionItem,
    reply: oneshot::Sender<ItemReply>,
}

struct DispatchContext {
    profile: ModelProfile,
    config: ProfileConfig,
    limiter: TokenBucket,
    provider: Arc<dyn GenerativeProvider>,
    accountant: Arc<MetricsAccountant>,
    max_attempts: u32,
    backoff_base: Duration,
    window: Duration,
    latency_threshold: Duration,
}

pub struct ProfileDispatcher {
    profile: ModelProfile,
    tx: mpsc::UnboundedSender<Job>,
}

impl ProfileDispatcher {
    /// Start the dispatcher task. Must be called inside a Tokio runtime.
    pub fn spawn(
        profile: ModelProfile,
        ai: &AiConfig,
        provider: Arc<dyn GenerativeProvider>,
        accountant: Arc<MetricsAccountant>,
    ) -> Self {
        let config = ai.profiles.get(profile).clone();
        let ctx = DispatchContext {
            profile,
            limiter: TokenBucket::new(config.requests_per_minute, config.burst),
            config,
            provider,
            accountant,
            max_attempts: ai.max_attempts.max(1),
            backoff_base: Duration::from_millis(ai.backoff_base_ms),
            window: Duration::from_millis(ai.batch_window_ms),
            latency_threshold: Duration::from_millis(ai.latency_threshold_ms),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(rx, Arc::new(ctx)));
        Self { profile, tx }
    }

    pub async fn submit(&self, item: ExtractionItem) -> ItemReply {
        let (reply, rx) = oneshot::channel();
        let stopped = || ProcessingFailure::ExtractionProviderError {
            attempts: 0,
            message: format!("{} dispatcher stopped", self.profile),
        };
        self.tx.send(Job { item, reply }).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }
}

async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Job>, ctx: Arc<DispatchContext>) {
    let class = EndpointClass::from(ctx.profile);
    while let Some(first) = rx.recv().await {
        let batch_size = ctx
            .accountant
            .effective_batch_size(class, ctx.config.batch_size, ctx.latency_threshold);
        ExtractionMetrics::set_effective_batch_size(ctx.profile.as_str(), batch_size);

        let mut jobs = vec![first];
        let deadline = tokio::time::Instant::now() + ctx.window;
        while jobs.len() < batch_size {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) | Err(_) => break,
            }
        }

        debug!(profile = %ctx.profile, items = jobs.len(), batch_size, "Dispatching extraction batch");
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.process(jobs).await });
    }
}

impl DispatchContext {
    async fn process(&self, jobs: Vec<Job>) {
        let profile = self.profile.as_str();
        let mut pending = jobs;
        let mut attempt: u32 = 0;

        while !pending.is_empty() {
            attempt += 1;
            let waited = self.limiter.acquire().await;
            if !waited.is_zero() {
                ExtractionMetrics::record_rate_limit_wait(profile, waited.as_secs_f64());
            }

            let items: Vec<ExtractionItem> = pending.iter().map(|j| j.item.clone()).collect();
            let started = Instant::now();
            let result = self.provider.complete(&self.config, &items).await;
            let elapsed = started.elapsed();

            let call_ok = result.is_ok();
            self.accountant.record(EndpointClass::from(self.profile), elapsed, call_ok).await;
            ExtractionMetrics::record_call(profile, items.len(), elapsed.as_secs_f64(), call_ok);

            let outcomes: Vec<Result<serde_json::Value, ProviderError>> = match result {
                Ok(outputs) if outputs.len() == items.len() => outputs,
                Ok(outputs) => {
                    let msg = format!("provider returned {} results for {} items", outputs.len(), items.len());
                    vec![Err(ProviderError::Malformed(msg)); items.len()]
                }
                Err(e) => vec![Err(e); items.len()],
            };

            let mut retry = Vec::new();
            let mut retry_after: Option<Duration> = None;
            for (job, outcome) in pending.into_iter().zip(outcomes) {
                match outcome {
                    Ok(value) => {
                        let reply = entries_from_output(&value).map_err(ProcessingFailure::ExtractionMalformed);
                        if let Err(failure) = &reply {
                            ExtractionMetrics::record_item_failed(profile, failure.label());
                            warn!(profile, url = %job.item.source_url, "Extraction output malformed: {}", failure);
                        }
                        let _ = job.reply.send(reply);
                    }
                    Err(e) if e.is_transient() && attempt < self.max_attempts => {
                        if let ProviderError::RateLimited { retry_after: Some(after) } = &e {
                            retry_after = Some(retry_after.map_or(*after, |r: Duration| r.max(*after)));
                        }
                        debug!(profile, url = %job.item.source_url, attempt, "Transient provider error, will retry: {}", e);
                        retry.push(job);
                    }
                    Err(e) => {
                        let failure = match e {
                            ProviderError::Malformed(msg) => ProcessingFailure::ExtractionMalformed(msg),
                            other => ProcessingFailure::ExtractionProviderError {
                                attempts: attempt,
                                message: other.to_string(),
                            },
                        };
                        ExtractionMetrics::record_item_failed(profile, failure.label());
                        warn!(profile, url = %job.item.source_url, attempt, "Extraction item failed: {}", failure);
                        let _ = job.reply.send(Err(failure));
                    }
                }
            }

            if !retry.is_empty() {
                let delay = self.backoff(attempt, retry_after);
                ExtractionMetrics::record_retry(profile);
                info!(profile, items = retry.len(), attempt, delay_ms = delay.as_millis() as u64, "Retrying extraction items");
                tokio::time::sleep(delay).await;
            }
            pending = retry;
        }
    }

    fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self.backoff_base.saturating_mul(1u32 << (attempt - 1).min(10));
        let jitter_cap = (self.backoff_base.as_millis() as u64 / 2).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_cap));
        let delay = exp + jitter;
        match retry_after {
            Some(after) if after > delay => after,
            _ => delay,
        }
    }
}
