//! Full review history for individual listing URLs, one local file per app.

use anyhow::Context;
use appscout_adapters::{listing_id_from_url, storefront_from_url, FailSoft};
use appscout_core::{ReviewRecord, RunStamp};
use appscout_storage::{OutputStore, StoredArtifact};
use tracing::{debug, info};

use crate::collect::{ReviewPaginator, ReviewTarget};
use crate::sink::SinkError;

#[derive(Debug)]
pub struct ListingReviews {
    pub url: String,
    pub app_id: String,
    pub app_name: String,
    pub country: String,
    pub reviews: Vec<ReviewRecord>,
}

#[derive(Debug)]
pub struct ListingReviewOutcome {
    pub app_id: String,
    pub country: String,
    pub reviews: usize,
    pub file: Result<StoredArtifact, SinkError>,
}

pub fn listing_reviews_file_name(app_id: &str, country: &str, stamp: &RunStamp) -> String {
    format!("{app_id}-{country}-apple-app-reviews-{}.json", stamp.file_stamp())
}

/// Reviews for one listing URL. The storefront in the URL wins over
/// `default_country`; the app name falls back to the identifier when the
/// detail lookup fails. Non-listing URLs yield `None`.
pub async fn harvest_listing(
    market: FailSoft<'_>,
    url: &str,
    default_country: &str,
    max_pages: Option<u32>,
) -> Option<ListingReviews> {
    let Some(app_id) = listing_id_from_url(url) else {
        debug!(url, "not a listing url, skipped");
        return None;
    };
    let country = storefront_from_url(url).unwrap_or_else(|| default_country.to_string());
    let app_name = market
        .app_detail(&app_id, &country)
        .await
        .map(|detail| detail.title)
        .unwrap_or_else(|| app_id.clone());

    let url = url.trim().to_string();
    let target = ReviewTarget {
        app_id: &app_id,
        app_name: &app_name,
        country: &country,
        keyword: &url,
    };
    let reviews = ReviewPaginator::new(market)
        .with_max_pages(max_pages)
        .collect(target)
        .await;
    info!(app_id = %app_id, country = %country, reviews = reviews.len(), "listing reviews collected");

    Some(ListingReviews {
        url,
        app_id,
        app_name,
        country,
        reviews,
    })
}

pub async fn write_listing_reviews(
    store: &OutputStore,
    harvest: &ListingReviews,
    stamp: &RunStamp,
) -> Result<StoredArtifact, SinkError> {
    let bytes = serde_json::to_vec_pretty(&harvest.reviews)
        .context("serializing listing reviews")
        .map_err(SinkError::Local)?;
    store
        .write_file(
            &listing_reviews_file_name(&harvest.app_id, &harvest.country, stamp),
            &bytes,
        )
        .await
        .map_err(SinkError::Local)
}
