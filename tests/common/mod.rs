#![allow(dead_code)]

use async_trait::async_trait;
use karaoke_scraper::config::{AiConfig, FetchConfig, PipelineConfig};
use karaoke_scraper::error::ProcessingFailure;
use karaoke_scraper::extraction::provider::ItemOutput;
use karaoke_scraper::extraction::{ExtractionEngine, ExtractionItem, GenerativeProvider, ProviderError};
use karaoke_scraper::config::ProfileConfig;
use karaoke_scraper::fetch::{FetchStrategySelector, FetcherKind, PageFetcher, RawPage};
use karaoke_scraper::frontier::UrlFrontier;
use karaoke_scraper::metrics::MetricsAccountant;
use karaoke_scraper::pipeline::Pipeline;
use karaoke_scraper::promotion::Promoter;
use karaoke_scraper::storage::{InMemoryStorage, Storage};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

pub const SCHEDULE_HTML: &str = "<html><head><title>The Rusty Mic</title></head><body>\
    <h1>Karaoke at The Rusty Mic</h1>\
    <p>Join us every Friday from 9pm until 1am for karaoke with DJ Sparkle. Sign-ups open at 8:30 and the \
    song book has over forty thousand tracks. Tuesdays bring our duet night at 8pm hosted by KJ Nova, with \
    drink specials all evening and prizes for the best harmony.</p>\
    <a href=\"/events\">Events</a> <a href=\"https://other.example.org/\">Elsewhere</a>\
    </body></html>";

/// Fetcher answering from a URL -> body map; unknown URLs get `default_body`.
pub struct ScriptedFetcher {
    bodies: HashMap<String, Result<String, ProcessingFailure>>,
    default_body: String,
    delay: Option<std::time::Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new(default_body: &str) -> Self {
        Self {
            bodies: HashMap::new(),
            default_body: default_body.to_string(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), Ok(body.to_string()));
        self
    }

    pub fn with_failure(mut self, url: &str, failure: ProcessingFailure) -> Self {
        self.bodies.insert(url.to_string(), Err(failure));
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Static
    }

    async fn fetch(&self, url: &str) -> Result<RawPage, ProcessingFailure> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let body = match self.bodies.get(url) {
            Some(Ok(body)) => body.clone(),
            Some(Err(failure)) => return Err(failure.clone()),
            None => self.default_body.clone(),
        };
        Ok(RawPage {
            status: 200,
            body,
            final_url: url.to_string(),
        })
    }
}

type Responder = dyn Fn(&ExtractionItem, u32) -> ItemOutput + Send + Sync;

/// Provider answering per item from a closure given the item and its attempt number.
pub struct ScriptedProvider {
    respond: Box<Responder>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<(Instant, usize)>>,
}

impl ScriptedProvider {
    pub fn new(respond: impl Fn(&ExtractionItem, u32) -> ItemOutput + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every item yields the same shows
    pub fn always(shows: Value) -> Arc<Self> {
        Self::new(move |_, _| Ok(json!({ "shows": shows.clone() })))
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }

    pub fn attempts_for(&self, source_url: &str) -> u32 {
        self.attempts.lock().unwrap().get(source_url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl GenerativeProvider for ScriptedProvider {
    async fn complete(&self, _profile: &ProfileConfig, items: &[ExtractionItem]) -> Result<Vec<ItemOutput>, ProviderError> {
        self.calls.lock().unwrap().push((Instant::now(), items.len()));
        let outputs = items
            .iter()
            .map(|item| {
                let attempt = {
                    let mut attempts = self.attempts.lock().unwrap();
                    let n = attempts.entry(item.source_url.clone()).or_insert(0);
                    *n += 1;
                    *n
                };
                (self.respond)(item, attempt)
            })
            .collect();
        Ok(outputs)
    }
}

pub fn two_shows() -> Value {
    json!([
        {"venue_name": "The Rusty Mic", "day_of_week": "Friday", "start_time": "21:00", "end_time": "01:00",
         "host": "DJ Sparkle", "city": "Austin", "state": "TX"},
        {"venue_name": "The Rusty Mic", "day_of_week": "Tuesday", "start_time": "8pm", "host": "KJ Nova"}
    ])
}

/// Fast, permissive settings for tests
pub fn ai_config() -> AiConfig {
    let mut config = AiConfig::default();
    config.batch_window_ms = 5;
    config.backoff_base_ms = 100;
    for profile in [
        &mut config.profiles.text,
        &mut config.profiles.vision,
        &mut config.profiles.platform,
        &mut config.profiles.worker,
    ] {
        profile.requests_per_minute = 6_000;
        profile.burst = 10;
    }
    config
}

pub struct Harness {
    pub storage: Arc<dyn Storage>,
    pub frontier: Arc<UrlFrontier>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub provider: Arc<ScriptedProvider>,
    pub pipeline: Pipeline,
}

pub fn harness(fetcher: ScriptedFetcher, provider: Arc<ScriptedProvider>, pipeline_config: PipelineConfig) -> Harness {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let fetcher = Arc::new(fetcher);
    let accountant = Arc::new(MetricsAccountant::new(storage.clone(), 20));
    let selector = FetchStrategySelector::new(FetchConfig::default(), fetcher.clone(), None);
    let engine = ExtractionEngine::new(&ai_config(), provider.clone(), accountant);
    let frontier = Arc::new(UrlFrontier::new(storage.clone(), pipeline_config.max_fetch_attempts));
    let promoter = Promoter::new(storage.clone(), None, pipeline_config.contradiction_threshold);
    let pipeline = Pipeline::new(
        frontier.clone(),
        Arc::new(selector),
        Arc::new(engine),
        Arc::new(promoter),
        storage.clone(),
        pipeline_config,
    );
    Harness {
        storage,
        frontier,
        fetcher,
        provider,
        pipeline,
    }
}
