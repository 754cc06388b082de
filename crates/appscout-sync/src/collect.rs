//! Collection stages: keyword expansion, identifier aggregation, app records and review paging.

use appscout_adapters::{listing_id_from_url, FailSoft};
use appscout_core::{
    parse_instant, AppRecord, ListingType, RawReview, ReviewRecord, PLATFORM_IOS,
};
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use tracing::{debug, info, warn};

/// Seeds plus the first-level suggestions of each seed, in first-seen order.
///
/// Suggestions are never expanded further.
pub async fn expand_keywords(market: FailSoft<'_>, seeds: &[String]) -> IndexSet<String> {
    let seeds: IndexSet<String> = seeds.iter().cloned().collect();
    let mut expanded = seeds.clone();
    for seed in &seeds {
        let suggestions = market.suggest(seed).await;
        debug!(keyword = %seed, count = suggestions.len(), "suggestions");
        expanded.extend(suggestions);
    }
    info!(seeds = seeds.len(), expanded = expanded.len(), "keywords expanded");
    expanded
}

/// Identifiers from listing URLs; malformed or unrelated URLs are skipped.
pub fn identifiers_from_urls(urls: &[String]) -> IndexSet<String> {
    urls.iter()
        .filter_map(|url| {
            let id = listing_id_from_url(url);
            if id.is_none() {
                debug!(url = %url, "not a listing url, skipped");
            }
            id
        })
        .collect()
}

/// Search hits for every keyword followed by identifiers parsed from listing URLs.
pub async fn aggregate_identifiers(
    market: FailSoft<'_>,
    keywords: &IndexSet<String>,
    listing_urls: &[String],
    country: &str,
) -> IndexSet<String> {
    let mut ids = IndexSet::new();
    for keyword in keywords {
        let hits = market.search(keyword, country).await;
        debug!(keyword = %keyword, hits = hits.len(), "keyword search");
        ids.extend(hits);
    }
    let from_search = ids.len();

    let from_urls = identifiers_from_urls(listing_urls);
    if !listing_urls.is_empty() && from_urls.is_empty() {
        info!("no identifiers found in the supplied listing urls");
    }
    ids.extend(from_urls);

    info!(from_search, total = ids.len(), "identifiers aggregated");
    ids
}

/// One record per resolvable identifier. Identifiers whose detail lookup fails
/// are skipped; a failed similar-apps lookup leaves `related_ids` empty.
pub async fn build_app_records(
    market: FailSoft<'_>,
    ids: &IndexSet<String>,
    country: &str,
    captured_at: DateTime<Utc>,
) -> Vec<AppRecord> {
    let mut seen: IndexSet<String> = IndexSet::new();
    let mut records = Vec::new();
    for id in ids {
        let Some(detail) = market.app_detail(id, country).await else {
            continue;
        };
        let app_id = if detail.app_id.is_empty() {
            id.clone()
        } else {
            detail.app_id.clone()
        };
        if !seen.insert(app_id.clone()) {
            debug!(app_id = %app_id, requested = %id, "detail resolved to an app already collected");
            continue;
        }
        let related_ids = market.similar(id, country).await;

        records.push(AppRecord {
            platform: PLATFORM_IOS.to_string(),
            country: country.to_string(),
            listing_type: ListingType::from_free_flag(detail.free),
            category_id: None,
            category_name: None,
            name: detail.title,
            rank: None,
            app_id,
            icon: detail.icon,
            link: detail.url,
            description: detail.description,
            captured_at,
            related_ids,
        });
    }
    info!(requested = ids.len(), built = records.len(), "app records built");
    records
}

/// Position of a review walk. Pages are visited 1, 2, 3, ... and never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    Fetching(u32),
    Exhausted,
}

impl PageCursor {
    pub fn start() -> Self {
        Self::Fetching(1)
    }

    /// Next state after the current page came back `empty` or not. `Exhausted` is terminal.
    pub fn advance(self, empty: bool) -> Self {
        match self {
            Self::Fetching(_) if empty => Self::Exhausted,
            Self::Fetching(page) => page.checked_add(1).map_or(Self::Exhausted, Self::Fetching),
            Self::Exhausted => Self::Exhausted,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReviewTarget<'a> {
    pub app_id: &'a str,
    pub app_name: &'a str,
    pub country: &'a str,
    pub keyword: &'a str,
}

/// Walks review pages for one app until an empty (or failed) page.
#[derive(Clone, Copy)]
pub struct ReviewPaginator<'a> {
    market: FailSoft<'a>,
    max_pages: Option<u32>,
}

impl<'a> ReviewPaginator<'a> {
    pub fn new(market: FailSoft<'a>) -> Self {
        Self {
            market,
            max_pages: None,
        }
    }

    /// Caller-imposed ceiling; the walk stops after `max_pages` pages even if more exist.
    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub async fn collect(&self, target: ReviewTarget<'_>) -> Vec<ReviewRecord> {
        let mut cursor = PageCursor::start();
        let mut records = Vec::new();

        while let PageCursor::Fetching(page) = cursor {
            let raw = self.market.reviews(target.app_id, target.country, page).await;
            let empty = raw.is_empty();
            records.extend(raw.into_iter().filter_map(|r| normalize_review(&target, r)));
            cursor = cursor.advance(empty);

            if let (PageCursor::Fetching(next), Some(max)) = (cursor, self.max_pages) {
                if next > max {
                    warn!(app_id = target.app_id, max_pages = max, "review page ceiling reached");
                    cursor = PageCursor::Exhausted;
                }
            }
        }

        debug!(app_id = target.app_id, reviews = records.len(), "reviews collected");
        records
    }
}

/// Replaces the first `\r` and then the first `\n` with a space and trims.
/// Later line breaks are kept as they are.
pub fn strip_first_line_breaks(text: &str) -> String {
    text.replacen('\r', " ", 1)
        .replacen('\n', " ", 1)
        .trim()
        .to_string()
}

pub fn normalize_review(target: &ReviewTarget<'_>, raw: RawReview) -> Option<ReviewRecord> {
    let Some(date) = parse_instant(&raw.updated) else {
        warn!(
            app_id = target.app_id,
            review_id = raw.id.as_deref().unwrap_or("?"),
            updated = %raw.updated,
            "review timestamp unparseable, review dropped"
        );
        return None;
    };
    Some(ReviewRecord {
        app_id: target.app_id.to_string(),
        app_name: target.app_name.to_string(),
        country: target.country.to_string(),
        keyword: target.keyword.to_string(),
        score: raw.score,
        user_name: raw.user_name.as_deref().map(str::trim).unwrap_or_default().to_string(),
        date,
        review: strip_first_line_breaks(raw.text.as_deref().unwrap_or_default()),
    })
}
