use crate::extraction::RunMode;
use crate::fetch::transform_url;
use crate::frontier::normalize_url;
use crate::pipeline::{Pipeline, ProcessOptions, UrlStatus};
use crate::types::{ParseData, ParseRequest, ParseResponse, TransformRequest, TransformResponse};
use tracing::{info, instrument, warn};

/// Operational entry points shared by the HTTP server and the CLI
pub struct ParseService {
    pipeline: Pipeline,
}

impl ParseService {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn parse(&self, request: ParseRequest) -> ParseResponse {
        if let Err(e) = normalize_url(&request.url) {
            return ParseResponse::err(e.to_string());
        }
        let opts = ProcessOptions {
            force_headless: request.use_puppeteer,
            include_subdomains: request.include_subdomains,
            follow_links: true,
            extract: request.ai_analysis,
            mode: RunMode::OnDemand,
        };

        match self.pipeline.process_url(&request.url, opts).await {
            Ok(report) => {
                let success = matches!(report.status, UrlStatus::Succeeded | UrlStatus::FetchedOnly);
                let error = report
                    .failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .or_else(|| report.error.clone())
                    .or_else(|| (!success).then(|| format!("processing ended as {:?}", report.status)));
                info!(status = ?report.status, entries = report.entries, "Parse request finished");
                ParseResponse {
                    success,
                    data: Some(ParseData {
                        total_urls: 1 + report.links_enqueued,
                        discovered_urls: report.links_enqueued,
                        report,
                    }),
                    error,
                }
            }
            Err(e) => {
                warn!("Parse request failed: {}", e);
                ParseResponse::err(e.to_string())
            }
        }
    }
}

/// Pure rewrite; no network access and no frontier changes.
pub fn transform(request: &TransformRequest) -> TransformResponse {
    match transform_url(&request.url) {
        Ok(transformed_url) => TransformResponse {
            success: true,
            transformed_url,
            error: None,
        },
        Err(e) => TransformResponse {
            success: false,
            transformed_url: request.url.clone(),
            error: Some(e.to_string()),
        },
    }
}
