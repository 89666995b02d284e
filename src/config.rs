use crate::constants::{DEFAULT_CONFIG_PATH, DEFAULT_USER_AGENT};
use crate::error::{Result, ScraperError};
use crate::extraction::ModelProfile;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub fetch: FetchConfig,
    pub ai: AiConfig,
    pub geocode: GeocodeConfig,
    pub music: MusicConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Global cap on URLs processed at once, independent of AI rate limits
    pub concurrency: usize,
    /// How many candidates a run claims from the frontier per pull
    pub batch_pull_size: usize,
    pub item_timeout_secs: u64,
    pub max_fetch_attempts: u32,
    /// Independent contradicting reports needed before a show is flagged
    pub contradiction_threshold: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_pull_size: 16,
            item_timeout_secs: 180,
            max_fetch_attempts: 3,
            contradiction_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub static_timeout_secs: u64,
    /// Browserless-compatible endpoint; headless rendering is disabled when unset
    pub headless_url: Option<String>,
    pub headless_token: Option<String>,
    pub page_load_timeout_secs: u64,
    pub script_budget_ms: u64,
    /// Hosts that always need client-side rendering
    pub headless_hosts: Vec<String>,
    pub login_wall_signatures: Vec<String>,
    /// Below this many visible characters a script-heavy page is re-rendered
    pub min_text_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            static_timeout_secs: 20,
            headless_url: None,
            headless_token: None,
            page_load_timeout_secs: 30,
            script_budget_ms: 5_000,
            headless_hosts: vec![
                "facebook.com".to_string(),
                "instagram.com".to_string(),
                "wixsite.com".to_string(),
            ],
            login_wall_signatures: vec![
                "you must log in to continue".to_string(),
                "log in to facebook".to_string(),
                "log into facebook".to_string(),
                "login • instagram".to_string(),
                "please log in".to_string(),
                "sign in to continue".to_string(),
            ],
            min_text_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Attempts per item, including the first
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// How long a dispatcher waits for more items before sending a partial batch
    pub batch_window_ms: u64,
    /// Number of recent calls averaged when deciding to shrink batches
    pub latency_window: usize,
    pub latency_threshold_ms: u64,
    pub profiles: AiProfiles,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            max_attempts: 3,
            backoff_base_ms: 500,
            batch_window_ms: 250,
            latency_window: 20,
            latency_threshold_ms: 20_000,
            profiles: AiProfiles::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AiProfiles {
    pub text: ProfileConfig,
    pub vision: ProfileConfig,
    pub platform: ProfileConfig,
    pub worker: ProfileConfig,
}

impl AiProfiles {
    pub fn get(&self, profile: ModelProfile) -> &ProfileConfig {
        match profile {
            ModelProfile::Text => &self.text,
            ModelProfile::Vision => &self.vision,
            ModelProfile::Platform => &self.platform,
            ModelProfile::Worker => &self.worker,
        }
    }
}

impl Default for AiProfiles {
    fn default() -> Self {
        Self {
            text: ProfileConfig {
                model: "gpt-4o-mini".to_string(),
                requests_per_minute: 60,
                burst: 1,
                batch_size: 4,
                temperature: 0.1,
                max_output_tokens: 4_096,
                max_chunk_chars: 24_000,
            },
            vision: ProfileConfig {
                model: "gpt-4o".to_string(),
                requests_per_minute: 10,
                burst: 1,
                batch_size: 1,
                temperature: 0.2,
                max_output_tokens: 4_096,
                max_chunk_chars: 8_000,
            },
            platform: ProfileConfig {
                model: "gpt-4o-mini".to_string(),
                requests_per_minute: 20,
                burst: 1,
                batch_size: 2,
                // Social posts are dense and loosely formatted
                temperature: 0.4,
                max_output_tokens: 4_096,
                max_chunk_chars: 16_000,
            },
            worker: ProfileConfig {
                model: "gpt-4o-mini".to_string(),
                requests_per_minute: 30,
                burst: 1,
                batch_size: 8,
                temperature: 0.0,
                max_output_tokens: 8_192,
                max_chunk_chars: 24_000,
            },
        }
    }
}

/// Model identity and limits for one extraction use case.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProfileConfig {
    pub model: String,
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    pub batch_size: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_chunk_chars: usize,
}

fn default_burst() -> u32 {
    1
}

impl Default for ProfileConfig {
    fn default() -> Self {
        AiProfiles::default().text
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeocodeConfig {
    pub base_url: String,
    pub requests_per_minute: u32,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            // Nominatim usage policy: at most one request per second
            requests_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MusicConfig {
    pub base_url: String,
    pub requests_per_minute: u32,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://itunes.apple.com".to_string(),
            requests_per_minute: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Config {
    /// Load configuration from `KARAOKE_CONFIG` (or `config.toml`), falling back
    /// to defaults when the file is absent, then apply environment overrides.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let path = std::env::var("KARAOKE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&path).exists() {
            Self::load_from(&path)?
        } else {
            debug!("No config file at '{}', using defaults", path);
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.ai.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("AI_BASE_URL") {
            if !url.trim().is_empty() {
                self.ai.base_url = url;
            }
        }
        if let Ok(url) = std::env::var("BROWSERLESS_URL") {
            if !url.trim().is_empty() {
                self.fetch.headless_url = Some(url);
            }
        }
        if let Ok(token) = std::env::var("BROWSERLESS_TOKEN") {
            if !token.trim().is_empty() {
                self.fetch.headless_token = Some(token);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.concurrency == 0 {
            return Err(ScraperError::Config("pipeline.concurrency must be at least 1".into()));
        }
        for profile in ModelProfile::ALL {
            let p = self.ai.profiles.get(profile);
            if p.requests_per_minute == 0 {
                return Err(ScraperError::Config(format!(
                    "ai.profiles.{}.requests_per_minute must be positive",
                    profile
                )));
            }
            if p.batch_size == 0 {
                return Err(ScraperError::Config(format!(
                    "ai.profiles.{}.batch_size must be positive",
                    profile
                )));
            }
            if !(0.0..=2.0).contains(&p.temperature) {
                return Err(ScraperError::Config(format!(
                    "ai.profiles.{}.temperature must be within 0.0..=2.0",
                    profile
                )));
            }
        }
        Ok(())
    }
}
