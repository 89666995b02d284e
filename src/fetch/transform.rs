//! Social-platform URL canonicalisation.
//!
//! Profile-style and mobile links are rewritten into the platform's canonical
//! page URL before any network call. The rewrite is pure and idempotent: a
//! canonical URL maps to itself.

use crate::constants::{FACEBOOK_CANONICAL_HOST, FACEBOOK_HOSTS, INSTAGRAM_CANONICAL_HOST, INSTAGRAM_HOSTS};
use crate::error::{Result, ScraperError};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocialPlatform {
    Facebook,
    Instagram,
}

impl SocialPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Instagram => "instagram",
        }
    }
}

pub fn detect_platform(url: &Url) -> Option<SocialPlatform> {
    let host = url.host_str()?.to_ascii_lowercase();
    if FACEBOOK_HOSTS.contains(&host.as_str()) {
        Some(SocialPlatform::Facebook)
    } else if INSTAGRAM_HOSTS.contains(&host.as_str()) {
        Some(SocialPlatform::Instagram)
    } else {
        None
    }
}

/// Rewrite a social URL into canonical page form; other URLs come back unchanged.
pub fn transform_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|e| ScraperError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match detect_platform(&url) {
        Some(SocialPlatform::Facebook) => Ok(canonical_facebook(&url)),
        Some(SocialPlatform::Instagram) => Ok(canonical_instagram(&url)),
        None => Ok(trimmed.to_string()),
    }
}

fn segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).map(|p| p.to_string()).collect())
        .unwrap_or_default()
}

fn build(host: &str, path: &[String]) -> String {
    if path.is_empty() {
        format!("https://{}/", host)
    } else {
        format!("https://{}/{}", host, path.join("/"))
    }
}

// First path segments that are site features rather than page identities
const FACEBOOK_RESERVED: &[&str] = &["watch", "marketplace", "login", "login.php", "share", "sharer", "hashtag", "help", "search"];

fn canonical_facebook(url: &Url) -> String {
    let segs = segments(url);
    let first = segs.first().map(|s| s.to_ascii_lowercase());

    let path: Vec<String> = match first.as_deref() {
        None => Vec::new(),
        // /profile.php?id=123 -> /123
        Some("profile.php") => match url.query_pairs().find(|(k, _)| k == "id") {
            Some((_, id)) if !id.is_empty() => vec![id.into_owned()],
            _ => vec!["profile.php".to_string()],
        },
        // /people/Some-Name/123 -> /123
        Some("people") if segs.len() >= 3 => vec![segs[2].clone()],
        // /pg/slug/events -> /slug
        Some("pg") if segs.len() >= 2 => vec![segs[1].to_ascii_lowercase()],
        // /p/Some-Name-100012345/ -> /100012345
        Some("p") if segs.len() >= 2 => match trailing_numeric_id(&segs[1]) {
            Some(id) => vec![id],
            None => vec![segs[1].to_ascii_lowercase()],
        },
        // groups and events are their own entities: keep kind + id
        Some(kind @ ("groups" | "events")) if segs.len() >= 2 => vec![kind.to_string(), segs[1].clone()],
        Some(reserved) if FACEBOOK_RESERVED.contains(&reserved) => segs.clone(),
        // /slug/about, /slug/posts/... -> /slug
        Some(slug) => vec![slug.to_string()],
    };
    build(FACEBOOK_CANONICAL_HOST, &path)
}

fn trailing_numeric_id(segment: &str) -> Option<String> {
    let candidate = segment.rsplit('-').next()?;
    (candidate.len() >= 5 && candidate.chars().all(|c| c.is_ascii_digit())).then(|| candidate.to_string())
}

fn canonical_instagram(url: &Url) -> String {
    let segs = segments(url);
    let path: Vec<String> = match segs.first().map(|s| s.to_ascii_lowercase()).as_deref() {
        None => Vec::new(),
        Some(kind @ ("p" | "reel" | "tv" | "stories" | "explore")) => {
            let mut keep = vec![kind.to_string()];
            keep.extend(segs.iter().skip(1).take(1).cloned());
            keep
        }
        Some(username) => vec![username.to_string()],
    };
    build(INSTAGRAM_CANONICAL_HOST, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_idempotent(input: &str) -> String {
        let once = transform_url(input).unwrap();
        let twice = transform_url(&once).unwrap();
        assert_eq!(once, twice, "transform not idempotent for {input}");
        once
    }

    #[test]
    fn test_facebook_profile_php_becomes_numeric_page() {
        let out = assert_idempotent("https://m.facebook.com/profile.php?id=100063512345678&ref=bookmarks#x");
        assert_eq!(out, "https://www.facebook.com/100063512345678");
    }

    #[test]
    fn test_facebook_people_and_pg_paths() {
        assert_eq!(
            assert_idempotent("https://www.facebook.com/people/Karaoke-Kim/100089999999/"),
            "https://www.facebook.com/100089999999"
        );
        assert_eq!(
            assert_idempotent("http://facebook.com/pg/RustyMicKaraoke/events/?ref=page_internal"),
            "https://www.facebook.com/rustymickaraoke"
        );
        assert_eq!(
            assert_idempotent("https://www.facebook.com/p/Rusty-Mic-Karaoke-100054321987/"),
            "https://www.facebook.com/100054321987"
        );
    }

    #[test]
    fn test_facebook_page_subtabs_collapse_to_page() {
        assert_eq!(
            assert_idempotent("https://web.facebook.com/RustyMicKaraoke/about"),
            "https://www.facebook.com/rustymickaraoke"
        );
    }

    #[test]
    fn test_facebook_groups_keep_id() {
        assert_eq!(
            assert_idempotent("https://www.facebook.com/groups/123456/permalink/789"),
            "https://www.facebook.com/groups/123456"
        );
    }

    #[test]
    fn test_instagram_profile() {
        assert_eq!(
            assert_idempotent("https://instagram.com/KJ_Sparkle/?igshid=abc"),
            "https://www.instagram.com/kj_sparkle"
        );
        assert_eq!(
            assert_idempotent("https://www.instagram.com/p/CxYz123/"),
            "https://www.instagram.com/p/CxYz123"
        );
    }

    #[test]
    fn test_non_social_url_is_untouched() {
        assert_eq!(
            assert_idempotent("https://example.com/venue-schedule?week=1"),
            "https://example.com/venue-schedule?week=1"
        );
    }

    #[test]
    fn test_invalid_url_is_error() {
        assert!(transform_url("facebook dot com").is_err());
    }
}
