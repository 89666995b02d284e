//! Request and response shapes for the operational parse and transform endpoints.

use crate::pipeline::UrlReport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    pub url: String,
    #[serde(default)]
    pub include_subdomains: bool,
    /// Force headless rendering
    #[serde(default)]
    pub use_puppeteer: bool,
    #[serde(default = "default_true")]
    pub ai_analysis: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseData {
    /// The requested URL plus any newly discovered same-site URLs
    pub total_urls: usize,
    pub discovered_urls: usize,
    pub report: UrlReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ParseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParseResponse {
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformResponse {
    pub success: bool,
    pub transformed_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
