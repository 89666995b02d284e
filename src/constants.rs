/// Shared constants used across the pipeline

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; KaraokeScheduleBot/0.1; +https://example.com/bot)";

/// Namespace for deterministic schedule ids (UUID v5)
pub const SCHEDULE_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x6b, 0x61, 0x72, 0x61, 0x6f, 0x6b, 0x65, 0x2d, 0x73, 0x63, 0x68, 0x65, 0x64, 0x75, 0x6c, 0x65,
]);

// Query parameters stripped during URL normalization
pub const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "igshid", "mibextid", "ref", "ref_src"];
pub const TRACKING_PARAM_PREFIXES: &[&str] = &["utm_"];

// Social platforms
pub const FACEBOOK_CANONICAL_HOST: &str = "www.facebook.com";
pub const FACEBOOK_HOSTS: &[&str] = &[
    "facebook.com",
    "www.facebook.com",
    "m.facebook.com",
    "mbasic.facebook.com",
    "web.facebook.com",
    "touch.facebook.com",
    "business.facebook.com",
    "fb.com",
    "www.fb.com",
];
pub const INSTAGRAM_CANONICAL_HOST: &str = "www.instagram.com";
pub const INSTAGRAM_HOSTS: &[&str] = &["instagram.com", "www.instagram.com", "m.instagram.com"];

pub const SERVICE_NAME: &str = "karaoke-scraper";
