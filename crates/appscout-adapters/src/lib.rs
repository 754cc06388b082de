//! Marketplace client contract, fails-soft wrapper and the App Store implementation.

use appscout_core::{AppDetail, RawReview};
use appscout_storage::{FetchError, HttpFetcher};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const CRATE_NAME: &str = "appscout-adapters";

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed {endpoint} payload: {message}")]
    Malformed {
        endpoint: &'static str,
        message: String,
    },
}

impl MarketplaceError {
    fn malformed(endpoint: &'static str, message: impl ToString) -> Self {
        Self::Malformed {
            endpoint,
            message: message.to_string(),
        }
    }
}

/// Lookup capabilities of a mobile-app marketplace. Any call may fail.
#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    async fn suggest(&self, term: &str) -> Result<Vec<String>, MarketplaceError>;

    async fn search(&self, term: &str, country: &str) -> Result<Vec<String>, MarketplaceError>;

    async fn app_detail(
        &self,
        app_id: &str,
        country: &str,
    ) -> Result<Option<AppDetail>, MarketplaceError>;

    async fn similar(&self, app_id: &str, country: &str) -> Result<Vec<String>, MarketplaceError>;

    /// One page of reviews, 1-based. An empty vector means there are no more pages.
    async fn reviews(
        &self,
        app_id: &str,
        country: &str,
        page: u32,
    ) -> Result<Vec<RawReview>, MarketplaceError>;
}

/// Uniform fails-soft view over a [`MarketplaceClient`]: every failure is logged
/// and degrades to an empty result for that single item.
#[derive(Clone, Copy)]
pub struct FailSoft<'a> {
    inner: &'a dyn MarketplaceClient,
}

impl<'a> FailSoft<'a> {
    pub fn new(inner: &'a dyn MarketplaceClient) -> Self {
        Self { inner }
    }

    pub async fn suggest(&self, term: &str) -> Vec<String> {
        self.inner.suggest(term).await.unwrap_or_else(|err| {
            warn!(keyword = term, error = %err, "suggestion lookup failed");
            Vec::new()
        })
    }

    pub async fn search(&self, term: &str, country: &str) -> Vec<String> {
        self.inner.search(term, country).await.unwrap_or_else(|err| {
            warn!(keyword = term, country, error = %err, "keyword search failed");
            Vec::new()
        })
    }

    pub async fn app_detail(&self, app_id: &str, country: &str) -> Option<AppDetail> {
        match self.inner.app_detail(app_id, country).await {
            Ok(Some(detail)) => Some(detail),
            Ok(None) => {
                warn!(app_id, country, "app not found");
                None
            }
            Err(err) => {
                warn!(app_id, country, error = %err, "app detail lookup failed");
                None
            }
        }
    }

    pub async fn similar(&self, app_id: &str, country: &str) -> Vec<String> {
        self.inner.similar(app_id, country).await.unwrap_or_else(|err| {
            warn!(app_id, country, error = %err, "similar apps lookup failed");
            Vec::new()
        })
    }

    pub async fn reviews(&self, app_id: &str, country: &str, page: u32) -> Vec<RawReview> {
        self.inner
            .reviews(app_id, country, page)
            .await
            .unwrap_or_else(|err| {
                warn!(app_id, country, page, error = %err, "review page lookup failed");
                Vec::new()
            })
    }
}

/// Identifier carried by a marketplace listing URL: the URL must contain `/app/`
/// and its final path segment must start with `id`. Query and fragment are ignored;
/// a scheme is not required. A trailing `/` leaves an empty final segment and no id.
pub fn listing_id_from_url(raw: &str) -> Option<String> {
    let path = raw.trim().split(['?', '#']).next().unwrap_or_default();
    if !path.contains("/app/") {
        return None;
    }
    let id = path.rsplit('/').next()?.strip_prefix("id")?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Two-letter storefront that opens a listing URL path (`/us/app/..`), lowercased.
pub fn storefront_from_url(raw: &str) -> Option<String> {
    let path = raw.trim().split(['?', '#']).next().unwrap_or_default();
    let rest = path.split_once("://").map_or(path, |(_, rest)| rest);
    let segment = rest.split('/').nth(1)?;
    if segment.len() == 2 && segment.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(segment.to_ascii_lowercase())
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStoreEndpoints {
    pub search: String,
    pub lookup: String,
    pub hints: String,
    pub web: String,
    pub rss: String,
}

impl Default for AppStoreEndpoints {
    fn default() -> Self {
        Self {
            search: "https://itunes.apple.com/search".to_string(),
            lookup: "https://itunes.apple.com/lookup".to_string(),
            hints: "https://search.itunes.apple.com/WebObjects/MZSearchHints.woa/wa/hints"
                .to_string(),
            web: "https://apps.apple.com".to_string(),
            rss: "https://itunes.apple.com".to_string(),
        }
    }
}

impl AppStoreEndpoints {
    pub fn suggest_url(&self, term: &str) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &self.hints,
            &[("clientApplication", "Software"), ("term", term)],
        )
    }

    pub fn search_url(&self, term: &str, country: &str) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &self.search,
            &[
                ("media", "software"),
                ("entity", "software"),
                ("term", term),
                ("country", country),
                ("limit", "50"),
            ],
        )
    }

    pub fn lookup_url(&self, app_id: &str, country: &str) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &self.lookup,
            &[("id", app_id), ("country", country), ("entity", "software")],
        )
    }

    pub fn listing_page_url(&self, app_id: &str, country: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.web)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend([country, "app", format!("id{app_id}").as_str()]);
        Ok(url)
    }

    pub fn reviews_url(&self, app_id: &str, country: &str, page: u32) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.rss)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend([
                country,
                "rss",
                "customerreviews",
                format!("page={page}").as_str(),
                format!("id={app_id}").as_str(),
                "sortby=mostrecent",
                "json",
            ]);
        Ok(url)
    }
}

/// App Store client over the public iTunes search, lookup, hints and RSS endpoints.
#[derive(Debug)]
pub struct AppStoreClient {
    http: HttpFetcher,
    endpoints: AppStoreEndpoints,
}

impl AppStoreClient {
    pub fn new(http: HttpFetcher) -> Self {
        Self::with_endpoints(http, AppStoreEndpoints::default())
    }

    pub fn with_endpoints(http: HttpFetcher, endpoints: AppStoreEndpoints) -> Self {
        Self { http, endpoints }
    }

    async fn get_text(
        &self,
        endpoint: &'static str,
        url: Result<Url, url::ParseError>,
    ) -> Result<String, MarketplaceError> {
        let url = url.map_err(|e| MarketplaceError::malformed(endpoint, e))?;
        debug!(endpoint, %url, "marketplace request");
        Ok(self.http.fetch_bytes(url.as_str()).await?.text())
    }
}

#[async_trait]
impl MarketplaceClient for AppStoreClient {
    async fn suggest(&self, term: &str) -> Result<Vec<String>, MarketplaceError> {
        let body = self
            .get_text("suggest", self.endpoints.suggest_url(term))
            .await?;
        parse_suggestions(&body)
    }

    async fn search(&self, term: &str, country: &str) -> Result<Vec<String>, MarketplaceError> {
        let body = self
            .get_text("search", self.endpoints.search_url(term, country))
            .await?;
        parse_search_results(&body)
    }

    async fn app_detail(
        &self,
        app_id: &str,
        country: &str,
    ) -> Result<Option<AppDetail>, MarketplaceError> {
        let body = self
            .get_text("lookup", self.endpoints.lookup_url(app_id, country))
            .await?;
        parse_lookup(&body)
    }

    async fn similar(&self, app_id: &str, country: &str) -> Result<Vec<String>, MarketplaceError> {
        let page_url = self
            .endpoints
            .listing_page_url(app_id, country)
            .map_err(|e| MarketplaceError::malformed("similar", e))?;
        let body = self.get_text("similar", Ok(page_url.clone())).await?;
        Ok(parse_similar_ids(&body, &page_url, app_id))
    }

    async fn reviews(
        &self,
        app_id: &str,
        country: &str,
        page: u32,
    ) -> Result<Vec<RawReview>, MarketplaceError> {
        let body = self
            .get_text("reviews", self.endpoints.reviews_url(app_id, country, page))
            .await?;
        parse_review_page(&body)
    }
}

fn parse_json(endpoint: &'static str, body: &str) -> Result<JsonValue, MarketplaceError> {
    serde_json::from_str(body).map_err(|e| MarketplaceError::malformed(endpoint, e))
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for key in path {
        cur = cur.get(*key)?;
    }
    cur.as_str()
}

/// Numeric or string identifiers both render as their decimal text.
fn json_id(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Suggestion terms from the hints plist: each `<dict>` holding `<key>term</key><string>..</string>`.
pub fn parse_suggestions(xml: &str) -> Result<Vec<String>, MarketplaceError> {
    let document = Html::parse_document(xml);
    let dict = Selector::parse("dict").map_err(|e| MarketplaceError::malformed("suggest", e))?;

    let mut terms = Vec::new();
    for node in document.select(&dict) {
        let children: Vec<ElementRef<'_>> = node.children().filter_map(ElementRef::wrap).collect();
        for pair in children.windows(2) {
            let (key, value) = (&pair[0], &pair[1]);
            if key.value().name() == "key"
                && element_text(key) == "term"
                && value.value().name() == "string"
            {
                let term = element_text(value);
                if !term.is_empty() {
                    terms.push(term);
                }
            }
        }
    }
    Ok(terms)
}

pub fn parse_search_results(body: &str) -> Result<Vec<String>, MarketplaceError> {
    let value = parse_json("search", body)?;
    let results = value
        .get("results")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| MarketplaceError::malformed("search", "missing results array"))?;
    Ok(results.iter().filter_map(|r| json_id(r, "trackId")).collect())
}

pub fn parse_lookup(body: &str) -> Result<Option<AppDetail>, MarketplaceError> {
    let value = parse_json("lookup", body)?;
    let Some(results) = value.get("results").and_then(JsonValue::as_array) else {
        return Err(MarketplaceError::malformed("lookup", "missing results array"));
    };
    let Some(app) = results.iter().find(|r| json_id(r, "trackId").is_some()) else {
        return Ok(None);
    };

    let text = |key: &str| json_str(app, &[key]).unwrap_or_default().to_string();
    let icon = json_str(app, &["artworkUrl512"])
        .or_else(|| json_str(app, &["artworkUrl100"]))
        .unwrap_or_default()
        .to_string();
    let price = app.get("price").and_then(JsonValue::as_f64).unwrap_or(0.0);

    Ok(Some(AppDetail {
        app_id: json_id(app, "trackId").unwrap_or_default(),
        title: text("trackName"),
        icon,
        url: text("trackViewUrl"),
        description: text("description"),
        free: price == 0.0,
    }))
}

/// Identifiers linked from a listing page, first-seen order, excluding the page's own app.
pub fn parse_similar_ids(html: &str, page_url: &Url, own_id: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut ids: Vec<String> = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(target) = page_url.join(href) else {
            continue;
        };
        if let Some(id) = listing_id_from_url(target.as_str()) {
            if id != own_id && !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Reviews from one customer-reviews RSS page. Entries without author or rating are skipped.
pub fn parse_review_page(body: &str) -> Result<Vec<RawReview>, MarketplaceError> {
    let value = parse_json("reviews", body)?;
    let Some(feed) = value.get("feed") else {
        return Err(MarketplaceError::malformed("reviews", "missing feed"));
    };
    let entries: Vec<&JsonValue> = match feed.get("entry") {
        Some(JsonValue::Array(items)) => items.iter().collect(),
        Some(single) if single.is_object() => vec![single],
        _ => return Ok(Vec::new()),
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            json_str(entry, &["author", "name", "label"])?;
            let score = json_str(entry, &["im:rating", "label"])?.trim().parse::<u8>().ok()?;
            Some(RawReview {
                id: json_str(entry, &["id", "label"]).map(str::to_string),
                user_name: json_str(entry, &["author", "name", "label"]).map(str::to_string),
                score,
                updated: json_str(entry, &["updated", "label"])
                    .unwrap_or_default()
                    .to_string(),
                text: json_str(entry, &["content", "label"]).map(str::to_string),
            })
        })
        .collect())
}
