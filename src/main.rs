use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use karaoke_scraper::config::Config;
use karaoke_scraper::domain::DiscoveredVia;
use karaoke_scraper::logging;
use karaoke_scraper::metrics;
use karaoke_scraper::music::{ItunesClient, MusicMetadataProvider};
use karaoke_scraper::pipeline::{Pipeline, ProcessOptions};
use karaoke_scraper::promotion::{Geocoder, Moderator, NominatimGeocoder};
use karaoke_scraper::server::{self, AppState};
use karaoke_scraper::service::{self, ParseService};
use karaoke_scraper::storage::{InMemoryStorage, Storage};
use karaoke_scraper::types::{ParseRequest, TransformRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "karaoke_scraper")]
#[command(about = "Discovers karaoke schedules on the web and turns them into moderated show listings")]
#[command(version)]
struct Cli {
    /// Path to the TOML config (defaults to KARAOKE_CONFIG or config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Seed the frontier and process it until drained or Ctrl-C
    Run {
        /// Seed URLs
        #[arg(long = "seed")]
        seeds: Vec<String>,
        /// File with one seed URL per line
        #[arg(long)]
        seeds_file: Option<PathBuf>,
        /// Treat seeds as already approved sources
        #[arg(long)]
        approve_seeds: bool,
    },
    /// Fetch, extract and promote a single URL
    Parse {
        url: String,
        #[arg(long)]
        include_subdomains: bool,
        /// Force headless rendering
        #[arg(long)]
        headless: bool,
        /// Only fetch and discover links
        #[arg(long)]
        no_ai: bool,
    },
    /// Print the canonical form of a social URL
    TransformUrl { url: String },
    /// Add URLs to the frontier
    Enqueue { urls: Vec<String> },
    /// Approve a source URL
    Approve { url: String },
    /// Reject a source URL
    Reject {
        url: String,
        #[arg(long, default_value = "rejected by moderator")]
        reason: String,
    },
    /// Geocode unvalidated venues
    ValidateVenues,
    /// Look up track metadata
    LookupTrack {
        term: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    config.context("Failed to load configuration")
}

fn read_seeds(seeds: Vec<String>, seeds_file: Option<&PathBuf>) -> Result<Vec<String>> {
    let mut all = seeds;
    if let Some(path) = seeds_file {
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        all.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }
    Ok(all)
}

fn moderator(config: &Config, storage: Arc<dyn Storage>, pipeline: &Pipeline) -> Result<Moderator> {
    let geocoder: Arc<dyn Geocoder> = Arc::new(NominatimGeocoder::new(&config.geocode, &config.fetch)?);
    Ok(Moderator::new(storage, pipeline.frontier(), Some(geocoder)))
}

fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling in-flight work");
            child.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    metrics::init_metrics();

    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());

    match cli.command {
        Commands::TransformUrl { url } => {
            let response = service::transform(&TransformRequest { url });
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Serve { port } => {
            let pipeline = Pipeline::from_config(&config, storage.clone())?;
            let state = Arc::new(AppState {
                moderator: moderator(&config, storage, &pipeline)?,
                parse: ParseService::new(pipeline),
            });
            server::start_server(state, port.unwrap_or(config.server.port)).await?;
        }
        Commands::Run {
            seeds,
            seeds_file,
            approve_seeds,
        } => {
            let pipeline = Pipeline::from_config(&config, storage)?;
            let frontier = pipeline.frontier();
            for seed in read_seeds(seeds, seeds_file.as_ref())? {
                match frontier.enqueue(&seed, DiscoveredVia::Seed).await {
                    Ok((url, _)) if approve_seeds => {
                        frontier.approve(&url).await?;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(seed = %seed, "Skipping seed: {}", e),
                }
            }
            let summary = pipeline.run(ProcessOptions::background(), shutdown_token()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Parse {
            url,
            include_subdomains,
            headless,
            no_ai,
        } => {
            let pipeline = Pipeline::from_config(&config, storage)?;
            let response = ParseService::new(pipeline)
                .parse(ParseRequest {
                    url,
                    include_subdomains,
                    use_puppeteer: headless,
                    ai_analysis: !no_ai,
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Enqueue { urls } => {
            let pipeline = Pipeline::from_config(&config, storage)?;
            for url in urls {
                let (normalized, inserted) = pipeline.frontier().enqueue(&url, DiscoveredVia::Manual).await?;
                println!("{} {}", if inserted { "added" } else { "known" }, normalized);
            }
        }
        Commands::Approve { url } => {
            let pipeline = Pipeline::from_config(&config, storage.clone())?;
            pipeline.frontier().enqueue(&url, DiscoveredVia::Manual).await?;
            let moved = moderator(&config, storage, &pipeline)?.approve_source(&url).await?;
            info!(url = %url, moved, "Source approved");
            println!("approved {} ({} pending show(s) now valid)", url, moved);
        }
        Commands::Reject { url, reason } => {
            let pipeline = Pipeline::from_config(&config, storage.clone())?;
            pipeline.frontier().enqueue(&url, DiscoveredVia::Manual).await?;
            let moved = moderator(&config, storage, &pipeline)?.reject_source(&url, &reason).await?;
            println!("rejected {} ({} pending show(s) invalidated)", url, moved);
        }
        Commands::ValidateVenues => {
            let pipeline = Pipeline::from_config(&config, storage.clone())?;
            let summary = moderator(&config, storage, &pipeline)?.validate_venues().await?;
            println!(
                "checked {} venue(s): {} validated, {} unresolved",
                summary.checked, summary.validated, summary.unresolved
            );
        }
        Commands::LookupTrack { term, limit } => {
            let client = ItunesClient::new(&config.music, &config.fetch)?;
            let tracks = client.search_tracks(&term, limit).await?;
            println!("{}", serde_json::to_string_pretty(&tracks)?);
        }
    }
    Ok(())
}
