use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use appscout_sync::{ConfigOverrides, PipelineConfig, RemoteStoreConfig};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "appscout")]
#[command(about = "App Store keyword, listing and review harvester")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// YAML file with the same keys as the environment layer, lowest precedence.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    country: Option<String>,

    /// Comma-separated seed keywords.
    #[arg(long, global = true)]
    keywords: Option<String>,

    /// Comma-separated App Store listing URLs.
    #[arg(long, global = true)]
    urls: Option<String>,

    /// Comma-separated listing URLs for the `reviews` command.
    #[arg(long, global = true)]
    review_urls: Option<String>,

    /// local, remote (alias d1) or both.
    #[arg(long, global = true)]
    sink: Option<String>,

    #[arg(long, global = true)]
    result_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    max_review_pages: Option<u32>,

    /// Default tracing filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Harvest once and persist to the configured sinks.
    Run,
    /// Harvest the full review history of each `--review-urls` listing, one file per app.
    Reviews,
    /// Print the resolved configuration without contacting anything.
    Config,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            country: self.country.clone(),
            keywords: self.keywords.clone(),
            urls: self.urls.clone(),
            review_urls: self.review_urls.clone(),
            sink: self.sink.clone(),
            result_dir: self.result_dir.clone(),
            max_review_pages: self.max_review_pages,
            ..Default::default()
        }
    }

    /// File, then environment, then flags; later layers win.
    fn resolve_config(&self) -> Result<PipelineConfig> {
        let file = match &self.config {
            Some(path) => ConfigOverrides::from_yaml_file(path)?,
            None => ConfigOverrides::default(),
        };
        let env = ConfigOverrides::from_env().context("reading environment")?;
        let layered = file.merge(env).merge(self.overrides());
        PipelineConfig::resolve(layered).context("resolving configuration")
    }
}

fn describe_remote(remote: Option<&RemoteStoreConfig>) -> String {
    match remote {
        Some(RemoteStoreConfig::D1(d1)) => format!("d1 database {}", d1.database_id),
        Some(RemoteStoreConfig::Postgres { .. }) => "postgres".to_string(),
        None => "none".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = cli.resolve_config()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!(country = %config.country, keywords = %config.keyword_label, "starting harvest");
            let summary = appscout_sync::run_once_with_config(config).await?;
            println!(
                "harvest complete: run_id={} stamp={} keywords={} identifiers={} apps={} reviews={}",
                summary.run_id,
                summary.stamp,
                summary.keywords,
                summary.identifiers,
                summary.apps,
                summary.reviews
            );
            if let Some(Ok(local)) = &summary.sink.local {
                println!("  {}", local.app_details.absolute_path.display());
                println!("  {}", local.reviews.absolute_path.display());
            }
            if let Some(Ok(remote)) = &summary.sink.remote {
                println!(
                    "  {}: {} app rows, {} review rows",
                    remote.target, remote.app_rows, remote.review_rows
                );
            }

            let failures = summary.sink.failures();
            for failure in &failures {
                error!(error = %failure, "sink failed");
            }
            if !failures.is_empty() {
                bail!("{} sink(s) failed", failures.len());
            }
        }
        Commands::Reviews => {
            if config.review_urls.is_empty() {
                bail!("no review urls configured (set APPLE_APP_PACKAGE_URL or --review-urls)");
            }
            let summary = appscout_sync::run_listing_reviews_with_config(config).await?;
            println!(
                "listing reviews complete: run_id={} stamp={} apps={}",
                summary.run_id,
                summary.stamp,
                summary.listings.len()
            );
            for listing in &summary.listings {
                match &listing.file {
                    Ok(file) => println!(
                        "  {} ({}): {} reviews -> {}",
                        listing.app_id,
                        listing.country,
                        listing.reviews,
                        file.absolute_path.display()
                    ),
                    Err(err) => error!(app_id = %listing.app_id, error = %err, "listing reviews failed"),
                }
            }
            let failed = summary.failures().count();
            if failed > 0 {
                bail!("{failed} listing review file(s) failed");
            }
        }
        Commands::Config => {
            println!("country={}", config.country);
            println!("keywords={:?}", config.seed_keywords);
            println!("urls={:?}", config.listing_urls);
            println!("review_urls={:?}", config.review_urls);
            println!("sink={}", config.sink_mode);
            println!("result_dir={}", config.result_dir.display());
            println!("remote={}", describe_remote(config.remote.as_ref()));
            match config.max_review_pages {
                Some(max) => println!("max_review_pages={max}"),
                None => println!("max_review_pages=unbounded"),
            }
        }
    }

    Ok(())
}
