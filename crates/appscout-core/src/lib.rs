//! Core domain model for appscout: marketplace payloads, normalized records and run settings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "appscout-core";

/// Platform label stamped on every app record produced from the App Store.
pub const PLATFORM_IOS: &str = "ios";

/// Listing label derived from the pricing flag. Not a ranking signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListingType {
    #[serde(rename = "top-free")]
    TopFree,
    #[serde(rename = "top-paid")]
    TopPaid,
}

impl ListingType {
    pub fn from_free_flag(free: bool) -> Self {
        if free {
            Self::TopFree
        } else {
            Self::TopPaid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopFree => "top-free",
            Self::TopPaid => "top-paid",
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// App detail as returned by the marketplace lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDetail {
    pub app_id: String,
    pub title: String,
    pub icon: String,
    pub url: String,
    pub description: String,
    pub free: bool,
}

/// One review exactly as the marketplace returned it, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReview {
    pub id: Option<String>,
    pub user_name: Option<String>,
    pub score: u8,
    pub updated: String,
    pub text: Option<String>,
}

/// Normalized app record. Field names on the wire follow the historical export format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub platform: String,
    pub country: String,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    #[serde(rename = "cid")]
    pub category_id: Option<String>,
    #[serde(rename = "cname")]
    pub category_name: Option<String>,
    #[serde(rename = "appname")]
    pub name: String,
    pub rank: Option<u32>,
    #[serde(rename = "appid")]
    pub app_id: String,
    pub icon: String,
    pub link: String,
    #[serde(rename = "title")]
    pub description: String,
    #[serde(rename = "updateAt", with = "iso_millis")]
    pub captured_at: DateTime<Utc>,
    #[serde(rename = "alsoBought")]
    pub related_ids: Vec<String>,
}

/// Normalized review record; `app_id` always refers to an [`AppRecord`] of the same run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(rename = "appid")]
    pub app_id: String,
    #[serde(rename = "appname")]
    pub app_name: String,
    pub country: String,
    pub keyword: String,
    pub score: u8,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(with = "iso_millis")]
    pub date: DateTime<Utc>,
    pub review: String,
}

/// Everything one invocation collected; the unit handed to the persistence sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub apps: Vec<AppRecord>,
    pub reviews: Vec<ReviewRecord>,
}

impl RunOutput {
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty() && self.reviews.is_empty()
    }

    pub fn reviews_for<'a>(&'a self, app_id: &'a str) -> impl Iterator<Item = &'a ReviewRecord> + 'a {
        self.reviews.iter().filter(move |r| r.app_id == app_id)
    }
}

/// Where a run's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkMode {
    Local,
    Remote,
    Both,
}

impl SinkMode {
    pub fn writes_local(&self) -> bool {
        matches!(self, Self::Local | Self::Both)
    }

    pub fn writes_remote(&self) -> bool {
        matches!(self, Self::Remote | Self::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized sink mode `{0}` (expected local, remote or both)")]
pub struct ParseSinkModeError(pub String);

impl FromStr for SinkMode {
    type Err = ParseSinkModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            // `d1` is the legacy spelling of the remote sink.
            "remote" | "d1" => Ok(Self::Remote),
            "both" => Ok(Self::Both),
            other => Err(ParseSinkModeError(other.to_string())),
        }
    }
}

/// Run start instant; names every file a run writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStamp(DateTime<Utc>);

impl RunStamp {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    /// ISO-8601 with `:` and `.` replaced by `-`, safe for file names.
    pub fn file_stamp(&self) -> String {
        self.0.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
    }
}

/// Canonical instant format shared by every persisted timestamp.
pub fn canonical_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses any RFC 3339 timestamp (with offset) into UTC.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::canonical_instant(*at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_instant(&raw).ok_or_else(|| D::Error::custom(format!("invalid instant `{raw}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).single().unwrap()
            + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn listing_type_follows_pricing_flag() {
        assert_eq!(ListingType::from_free_flag(true), ListingType::TopFree);
        assert_eq!(ListingType::from_free_flag(false).as_str(), "top-paid");
    }

    #[test]
    fn sink_mode_parses_known_values_only() {
        assert_eq!("local".parse::<SinkMode>().unwrap(), SinkMode::Local);
        assert_eq!(" Both ".parse::<SinkMode>().unwrap(), SinkMode::Both);
        assert_eq!("d1".parse::<SinkMode>().unwrap(), SinkMode::Remote);
        assert!("s3".parse::<SinkMode>().is_err());
        assert!(SinkMode::Both.writes_local() && SinkMode::Both.writes_remote());
        assert!(!SinkMode::Remote.writes_local());
    }

    #[test]
    fn run_stamp_is_file_name_safe() {
        let stamp = RunStamp::new(fixed_instant());
        assert_eq!(stamp.file_stamp(), "2024-05-01T10-20-30-123Z");
    }

    #[test]
    fn instants_normalize_to_utc_millis() {
        let parsed = parse_instant("2024-05-01T03:20:30.123-07:00").unwrap();
        assert_eq!(canonical_instant(parsed), "2024-05-01T10:20:30.123Z");
        assert!(parse_instant("yesterday").is_none());
    }

    #[test]
    fn app_record_uses_export_field_names() {
        let record = AppRecord {
            platform: PLATFORM_IOS.to_string(),
            country: "us".into(),
            listing_type: ListingType::TopFree,
            category_id: None,
            category_name: None,
            name: "Bible".into(),
            rank: None,
            app_id: "282935706".into(),
            icon: "https://example.test/icon.png".into(),
            link: "https://apps.apple.com/us/app/bible/id282935706".into(),
            description: "Read daily".into(),
            captured_at: fixed_instant(),
            related_ids: vec!["1".into(), "2".into()],
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "top-free");
        assert_eq!(value["appname"], "Bible");
        assert_eq!(value["title"], "Read daily");
        assert_eq!(value["updateAt"], "2024-05-01T10:20:30.123Z");
        assert_eq!(value["alsoBought"], serde_json::json!(["1", "2"]));
        assert!(value["rank"].is_null());

        let back: AppRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
