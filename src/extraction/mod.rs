//! AI extraction of schedule entries from fetched pages.
//!
//! Each [`ModelProfile`] owns a dispatcher with its own token bucket, batch
//! size and model settings, so a slow vision model never eats into the text
//! profile's throughput.

pub mod batcher;
pub mod prompt;
pub mod provider;
pub mod rate_limiter;

pub use batcher::ProfileDispatcher;
pub use prompt::ExtractionItem;
pub use provider::{GenerativeProvider, OpenAiCompatibleProvider, ProviderError};
pub use rate_limiter::TokenBucket;

use crate::config::AiConfig;
use crate::domain::ScheduleEntry;
use crate::error::ProcessingFailure;
use crate::fetch::FetchedPage;
use crate::metrics::MetricsAccountant;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProfile {
    /// General page text, on-demand requests
    Text,
    /// Flyer and image-heavy pages
    Vision,
    /// Social-platform pages
    Platform,
    /// Background batch runs
    Worker,
}

impl ModelProfile {
    pub const ALL: [ModelProfile; 4] = [
        ModelProfile::Text,
        ModelProfile::Vision,
        ModelProfile::Platform,
        ModelProfile::Worker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProfile::Text => "text",
            ModelProfile::Vision => "vision",
            ModelProfile::Platform => "platform",
            ModelProfile::Worker => "worker",
        }
    }
}

impl fmt::Display for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for the extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    OnDemand,
    Background,
}

// Below this much text a page with images is read from its images
const VISION_TEXT_THRESHOLD: usize = 400;

pub fn select_profile(page: &FetchedPage, mode: RunMode) -> ModelProfile {
    if page.platform().is_some() {
        ModelProfile::Platform
    } else if page.text.chars().count() < VISION_TEXT_THRESHOLD && !page.images.is_empty() {
        ModelProfile::Vision
    } else {
        match mode {
            RunMode::Background => ModelProfile::Worker,
            RunMode::OnDemand => ModelProfile::Text,
        }
    }
}

/// Split text on line boundaries into chunks of at most `max_chars` characters.
/// Lines longer than the limit are hard-split.
pub fn chunk_content(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        for piece in chars.chunks(max_chars) {
            let piece_len = piece.len() + 1;
            if current_len + piece_len > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current).trim_end().to_string());
                current_len = 0;
            }
            current.extend(piece.iter());
            current.push('\n');
            current_len += piece_len;
        }
    }
    let tail = current.trim_end();
    if !tail.is_empty() {
        chunks.push(tail.to_string());
    }
    chunks
}

/// Output of one extraction pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub pass: usize,
    pub profile: ModelProfile,
    pub source_url: String,
    pub extracted_at: DateTime<Utc>,
    pub outcome: Result<Vec<ScheduleEntry>, ProcessingFailure>,
}

pub struct ExtractionEngine {
    config: AiConfig,
    dispatchers: HashMap<ModelProfile, ProfileDispatcher>,
}

impl ExtractionEngine {
    /// Spawns one dispatcher per profile; call inside a Tokio runtime.
    pub fn new(config: &AiConfig, provider: Arc<dyn GenerativeProvider>, accountant: Arc<MetricsAccountant>) -> Self {
        let dispatchers = ModelProfile::ALL
            .into_iter()
            .map(|p| (p, ProfileDispatcher::spawn(p, config, provider.clone(), accountant.clone())))
            .collect();
        Self {
            config: config.clone(),
            dispatchers,
        }
    }

    /// Single extraction pass over one item.
    pub async fn extract(&self, item: ExtractionItem, profile: ModelProfile) -> ExtractionResult {
        self.run_pass(0, item, profile).await
    }

    async fn run_pass(&self, pass: usize, item: ExtractionItem, profile: ModelProfile) -> ExtractionResult {
        let source_url = item.source_url.clone();
        let outcome = match self.dispatchers.get(&profile) {
            Some(dispatcher) => dispatcher.submit(item).await,
            None => Err(ProcessingFailure::ExtractionProviderError {
                attempts: 0,
                message: format!("no dispatcher for profile {}", profile),
            }),
        };
        ExtractionResult {
            pass,
            profile,
            source_url,
            extracted_at: Utc::now(),
            outcome,
        }
    }

    /// All passes for a page: one per content chunk, run concurrently.
    /// Returns once every pass has finished or exhausted its retries.
    #[instrument(skip(self, page), fields(url = %page.source_url))]
    pub async fn extract_page(&self, page: &FetchedPage, profile: ModelProfile) -> Vec<ExtractionResult> {
        let max_chars = self.config.profiles.get(profile).max_chunk_chars;
        let images = if profile == ModelProfile::Vision {
            page.images.clone()
        } else {
            Vec::new()
        };

        let chunks = chunk_content(&page.text, max_chars);
        if chunks.is_empty() && images.is_empty() {
            info!("Page has no text or images, skipping extraction");
            return vec![ExtractionResult {
                pass: 0,
                profile,
                source_url: page.source_url.clone(),
                extracted_at: page.fetched_at,
                outcome: Ok(Vec::new()),
            }];
        }

        let items: Vec<ExtractionItem> = if chunks.is_empty() {
            vec![ExtractionItem {
                source_url: page.source_url.clone(),
                content: String::new(),
                image_urls: images,
            }]
        } else {
            chunks
                .into_iter()
                .enumerate()
                .map(|(i, content)| ExtractionItem {
                    source_url: page.source_url.clone(),
                    content,
                    // images ride along with the first chunk only
                    image_urls: if i == 0 { images.clone() } else { Vec::new() },
                })
                .collect()
        };

        info!(passes = items.len(), "Extracting page");
        join_all(
            items
                .into_iter()
                .enumerate()
                .map(|(pass, item)| self.run_pass(pass, item, profile)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchStrategy, FetcherKind, SocialPlatform};

    fn page(text: &str, images: Vec<&str>, strategy: FetchStrategy) -> FetchedPage {
        FetchedPage {
            source_url: "https://example.com/venue-schedule".into(),
            final_url: "https://example.com/venue-schedule".into(),
            fetched_at: Utc::now(),
            strategy,
            fetched_with: FetcherKind::Static,
            html: String::new(),
            text: text.into(),
            links: vec![],
            images: images.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn test_profile_selection() {
        let long = "karaoke ".repeat(100);
        let social = page(&long, vec![], FetchStrategy::PlatformTransform(SocialPlatform::Facebook));
        assert_eq!(select_profile(&social, RunMode::OnDemand), ModelProfile::Platform);

        let flyer = page("Karaoke!", vec!["https://example.com/flyer.jpg"], FetchStrategy::Static);
        assert_eq!(select_profile(&flyer, RunMode::Background), ModelProfile::Vision);

        let text = page(&long, vec!["https://example.com/logo.png"], FetchStrategy::Static);
        assert_eq!(select_profile(&text, RunMode::Background), ModelProfile::Worker);
        assert_eq!(select_profile(&text, RunMode::OnDemand), ModelProfile::Text);
    }

    #[test]
    fn test_chunking_respects_limit_and_keeps_everything() {
        let text = "line one\nline two\nline three\n".repeat(10);
        let chunks = chunk_content(&text, 40);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
        let rejoined: String = chunks.join("\n");
        assert_eq!(rejoined.lines().count(), 30);
    }

    #[test]
    fn test_chunking_splits_long_lines_and_skips_empty() {
        assert!(chunk_content("", 10).is_empty());
        let chunks = chunk_content(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_profile_display_matches_config_keys() {
        assert_eq!(ModelProfile::Platform.to_string(), "platform");
        assert_eq!(serde_json::to_string(&ModelProfile::Worker).unwrap(), "\"worker\"");
    }
}
