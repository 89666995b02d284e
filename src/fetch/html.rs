//! HTML content signals: visible text, outbound links, images and walls.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));
static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").expect("static selector"));
static OG_IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).expect("static selector"));
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("static selector"));
static PASSWORD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[type="password"]"#).expect("static selector"));
static SCRIPT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("script").expect("static selector"));

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));
static ENABLE_JS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(enable|turn on)\s+javascript|javascript\s+(is\s+)?(required|disabled)").expect("static regex"));

const INVISIBLE: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

// Beyond this much visible text a wall phrase is just page chrome
const WALL_TEXT_LIMIT: usize = 2_000;

/// Parsed page with the signals the fetch and extraction stages need
pub struct PageContent {
    pub text: String,
    pub title: Option<String>,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub has_password_field: bool,
    pub script_count: usize,
}

impl PageContent {
    pub fn parse(html: &str, base: &Url) -> Self {
        let doc = Html::parse_document(html);
        Self {
            text: visible_text(&doc),
            title: doc
                .select(&TITLE_SELECTOR)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty()),
            links: links(&doc, base),
            images: images(&doc, base),
            has_password_field: doc.select(&PASSWORD_SELECTOR).next().is_some(),
            script_count: doc.select(&SCRIPT_SELECTOR).count(),
        }
    }
}

fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| INVISIBLE.contains(&el.value().name()));
        if hidden {
            continue;
        }
        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            out.push_str(&line);
            out.push('\n');
        }
    }
    BLANK_LINES.replace_all(out.trim(), "\n\n").into_owned()
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

fn links(doc: &Html, base: &Url) -> Vec<String> {
    let mut out: Vec<String> = doc
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve(base, href))
        .collect();
    out.sort();
    out.dedup();
    out
}

fn images(doc: &Html, base: &Url) -> Vec<String> {
    let mut out: Vec<String> = doc
        .select(&OG_IMAGE_SELECTOR)
        .filter_map(|m| m.value().attr("content"))
        .chain(doc.select(&IMG_SELECTOR).filter_map(|i| i.value().attr("src")))
        .filter(|src| !src.starts_with("data:"))
        .filter_map(|src| resolve(base, src))
        .collect();
    let mut seen = std::collections::HashSet::new();
    out.retain(|u| seen.insert(u.clone()));
    out
}

/// Match the page against known "please log in" signatures.
///
/// A signature only counts on short pages or pages asking for a password,
/// so a venue site with a members-area footer link is not treated as walled.
pub fn detect_login_wall(page: &PageContent, signatures: &[String]) -> Option<String> {
    if page.text.len() > WALL_TEXT_LIMIT && !page.has_password_field {
        return None;
    }
    let haystack = format!("{}\n{}", page.title.as_deref().unwrap_or(""), page.text).to_lowercase();
    signatures
        .iter()
        .find(|sig| !sig.is_empty() && haystack.contains(&sig.to_lowercase()))
        .cloned()
}

/// True when the static response looks like a client-rendered shell.
pub fn needs_rendering(page: &PageContent, html: &str, min_text_chars: usize) -> bool {
    page.text.chars().count() < min_text_chars && (page.script_count > 0 || ENABLE_JS.is_match(html))
}

/// Same host as `seed`, or a subdomain of it when `include_subdomains` is set.
pub fn is_same_site(seed: &Url, candidate: &str, include_subdomains: bool) -> bool {
    let Ok(candidate) = Url::parse(candidate) else {
        return false;
    };
    let (Some(seed_host), Some(host)) = (seed.host_str(), candidate.host_str()) else {
        return false;
    };
    let seed_host = seed_host.trim_start_matches("www.");
    let host = host.trim_start_matches("www.");
    host == seed_host || (include_subdomains && host.ends_with(&format!(".{}", seed_host)))
}
