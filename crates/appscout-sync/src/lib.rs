//! Run orchestration: keyword expansion through persistence, one stage at a time.

use std::time::Duration;

use anyhow::{Context, Result};
use appscout_adapters::{AppStoreClient, FailSoft, MarketplaceClient};
use appscout_core::{RunOutput, RunStamp};
use appscout_storage::{
    D1Executor, HttpClientConfig, HttpFetcher, OutputStore, PostgresExecutor, StatementExecutor,
    TokenBucketConfig,
};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub mod collect;
pub mod config;
pub mod listing;
pub mod sink;

pub use collect::{
    aggregate_identifiers, build_app_records, expand_keywords, PageCursor, ReviewPaginator,
    ReviewTarget,
};
pub use config::{ConfigError, ConfigOverrides, PipelineConfig, RemoteStoreConfig};
pub use listing::{harvest_listing, ListingReviewOutcome, ListingReviews};
pub use sink::{PersistenceSink, SinkError, SinkReport};

pub const CRATE_NAME: &str = "appscout-sync";

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub stamp: String,
    pub keywords: usize,
    pub identifiers: usize,
    pub apps: usize,
    pub reviews: usize,
    pub sink: SinkReport,
}

#[derive(Debug)]
pub struct ListingReviewSummary {
    pub run_id: Uuid,
    pub stamp: String,
    pub listings: Vec<ListingReviewOutcome>,
}

impl ListingReviewSummary {
    pub fn failures(&self) -> impl Iterator<Item = &ListingReviewOutcome> {
        self.listings.iter().filter(|l| l.file.is_err())
    }
}

/// What the collection stages produced before persistence.
#[derive(Debug, Default)]
pub struct Collected {
    pub keywords: usize,
    pub identifiers: usize,
    pub output: RunOutput,
}

pub struct Pipeline {
    config: PipelineConfig,
    market: Box<dyn MarketplaceClient>,
    executor: Option<Box<dyn StatementExecutor>>,
    store: OutputStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, market: Box<dyn MarketplaceClient>) -> Self {
        let store = OutputStore::new(config.result_dir.clone());
        Self {
            config,
            market,
            executor: None,
            store,
        }
    }

    pub fn with_executor(mut self, executor: Box<dyn StatementExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Expansion, aggregation, app records and reviews, strictly in that order.
    pub async fn collect(&self, stamp: &RunStamp) -> Collected {
        let config = &self.config;
        let market = FailSoft::new(self.market.as_ref());

        let keywords = expand_keywords(market, &config.seed_keywords)
            .instrument(info_span!("expand_keywords"))
            .await;
        let ids = aggregate_identifiers(market, &keywords, &config.listing_urls, &config.country)
            .instrument(info_span!("aggregate_identifiers"))
            .await;
        if ids.is_empty() {
            info!(
                keywords = %config.keyword_label,
                urls = config.listing_urls.len(),
                "no apps found for the configured keywords and urls"
            );
            return Collected {
                keywords: keywords.len(),
                ..Default::default()
            };
        }

        let apps = build_app_records(market, &ids, &config.country, stamp.instant())
            .instrument(info_span!("build_app_records"))
            .await;

        let paginator = ReviewPaginator::new(market).with_max_pages(config.max_review_pages);
        let mut reviews = Vec::new();
        for app in &apps {
            let target = ReviewTarget {
                app_id: &app.app_id,
                app_name: &app.name,
                country: &app.country,
                keyword: &config.keyword_label,
            };
            reviews.extend(
                paginator
                    .collect(target)
                    .instrument(info_span!("reviews", app_id = %app.app_id))
                    .await,
            );
        }
        info!(apps = apps.len(), reviews = reviews.len(), "collection finished");

        Collected {
            keywords: keywords.len(),
            identifiers: ids.len(),
            output: RunOutput { apps, reviews },
        }
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        self.run_once_at(RunStamp::now()).await
    }

    /// Only a missing output directory aborts the run; everything later degrades to
    /// partial output and is reported in the summary.
    pub async fn run_once_at(&self, stamp: RunStamp) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        self.store
            .ensure_root()
            .await
            .context("preparing result directory")?;
        info!(%run_id, stamp = %stamp.file_stamp(), sink = %self.config.sink_mode, "run started");

        let collected = self.collect(&stamp).await;
        let sink = if collected.identifiers == 0 {
            SinkReport::default()
        } else {
            PersistenceSink::new(&self.store, self.executor.as_deref())
                .persist(
                    &collected.output,
                    self.config.sink_mode,
                    &stamp,
                    &self.config.keyword_label,
                )
                .await
        };

        Ok(RunSummary {
            run_id,
            stamp: stamp.file_stamp(),
            keywords: collected.keywords,
            identifiers: collected.identifiers,
            apps: collected.output.apps.len(),
            reviews: collected.output.reviews.len(),
            sink,
        })
    }

    pub async fn harvest_listing_reviews(&self) -> Result<ListingReviewSummary> {
        self.harvest_listing_reviews_at(RunStamp::now()).await
    }

    /// Walks every configured review URL in order and writes one file per app.
    /// A failed write is reported for that app only.
    pub async fn harvest_listing_reviews_at(&self, stamp: RunStamp) -> Result<ListingReviewSummary> {
        let run_id = Uuid::new_v4();
        self.store
            .ensure_root()
            .await
            .context("preparing result directory")?;
        info!(%run_id, urls = self.config.review_urls.len(), "listing review harvest started");

        let market = FailSoft::new(self.market.as_ref());
        let mut listings = Vec::new();
        for url in &self.config.review_urls {
            let Some(harvest) = harvest_listing(
                market,
                url,
                &self.config.country,
                self.config.max_review_pages,
            )
            .instrument(info_span!("listing_reviews", url = %url))
            .await
            else {
                continue;
            };
            let file = listing::write_listing_reviews(&self.store, &harvest, &stamp).await;
            if let Err(err) = &file {
                error!(app_id = %harvest.app_id, error = %err, "listing reviews not written");
            }
            listings.push(ListingReviewOutcome {
                app_id: harvest.app_id,
                country: harvest.country,
                reviews: harvest.reviews.len(),
                file,
            });
        }

        Ok(ListingReviewSummary {
            run_id,
            stamp: stamp.file_stamp(),
            listings,
        })
    }
}

pub fn build_executor(
    remote: &RemoteStoreConfig,
    timeout: Duration,
) -> Result<Box<dyn StatementExecutor>> {
    Ok(match remote {
        RemoteStoreConfig::D1(d1) => Box::new(D1Executor::new(d1.clone(), timeout)?),
        RemoteStoreConfig::Postgres { database_url } => {
            Box::new(PostgresExecutor::connect_lazy(database_url)?)
        }
    })
}

fn app_store_client(config: &PipelineConfig) -> Result<AppStoreClient> {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        token_bucket: Some(TokenBucketConfig {
            capacity: 5,
            refill_every: Duration::from_millis(250),
        }),
    })?;
    Ok(AppStoreClient::new(http))
}

/// Wire the App Store client and the configured remote store, then run once.
pub async fn run_once_with_config(config: PipelineConfig) -> Result<RunSummary> {
    let timeout = Duration::from_secs(config.http_timeout_secs);
    let market = app_store_client(&config)?;
    let executor = match (&config.remote, config.sink_mode.writes_remote()) {
        (Some(remote), true) => Some(build_executor(remote, timeout)?),
        _ => None,
    };

    let mut pipeline = Pipeline::new(config, Box::new(market));
    if let Some(executor) = executor {
        pipeline = pipeline.with_executor(executor);
    }
    pipeline.run_once().await
}

/// Harvest the full review history of every configured listing URL.
pub async fn run_listing_reviews_with_config(config: PipelineConfig) -> Result<ListingReviewSummary> {
    let market = app_store_client(&config)?;
    Pipeline::new(config, Box::new(market))
        .harvest_listing_reviews()
        .await
}
