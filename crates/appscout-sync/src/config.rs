//! Run configuration: defaults, optional YAML file, environment, then CLI flags.

use std::path::{Path, PathBuf};

use anyhow::Context;
use appscout_core::{ParseSinkModeError, SinkMode};
use appscout_storage::sql::D1_API_BASE;
use appscout_storage::D1Config;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_COUNTRY: &str = "us";
pub const DEFAULT_KEYWORDS: &str = "bible";
pub const DEFAULT_RESULT_DIR: &str = "./result";
pub const DEFAULT_USER_AGENT: &str = "appscout/0.1";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    SinkMode(#[from] ParseSinkModeError),
    #[error("invalid value `{value}` for {key}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("sink mode `{0}` writes to the remote store but no remote store is configured (set REMOTE_DATABASE_URL or the CLOUDFLARE_* variables)")]
    MissingRemote(SinkMode),
    #[error("no seed keywords and no listing URLs configured")]
    NothingToDo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStoreConfig {
    D1(D1Config),
    Postgres { database_url: String },
}

/// Immutable settings for one run, threaded through every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub country: String,
    /// Seed keywords exactly as configured; labels reviews and the reviews file.
    pub keyword_label: String,
    pub seed_keywords: Vec<String>,
    pub listing_urls: Vec<String>,
    /// Listing URLs whose full review history is harvested into one file per app.
    pub review_urls: Vec<String>,
    pub sink_mode: SinkMode,
    pub result_dir: PathBuf,
    pub remote: Option<RemoteStoreConfig>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_review_pages: Option<u32>,
}

/// One configuration layer. Unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub country: Option<String>,
    pub keywords: Option<String>,
    pub urls: Option<String>,
    pub review_urls: Option<String>,
    pub sink: Option<String>,
    pub result_dir: Option<PathBuf>,
    pub cloudflare_account_id: Option<String>,
    pub cloudflare_database_id: Option<String>,
    pub cloudflare_api_token: Option<String>,
    pub cloudflare_api_base: Option<String>,
    pub remote_database_url: Option<String>,
    pub user_agent: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub max_review_pages: Option<u32>,
}

impl ConfigOverrides {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Reads the environment variable names through `lookup`; blank values count as unset.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Self {
            country: var("COUNTRY"),
            keywords: var("KEYWORD"),
            urls: var("URLS"),
            review_urls: var("APPLE_APP_PACKAGE_URL"),
            sink: var("SAVE_LOCATION"),
            result_dir: var("RESULT_FOLDER").map(PathBuf::from),
            cloudflare_account_id: var("CLOUDFLARE_ACCOUNT_ID"),
            cloudflare_database_id: var("CLOUDFLARE_D1_DATABASE_ID"),
            cloudflare_api_token: var("CLOUDFLARE_API_TOKEN"),
            cloudflare_api_base: var("CLOUDFLARE_API_BASE"),
            remote_database_url: var("REMOTE_DATABASE_URL"),
            user_agent: var("APPSCOUT_USER_AGENT"),
            http_timeout_secs: parse_number("APPSCOUT_HTTP_TIMEOUT_SECS", var("APPSCOUT_HTTP_TIMEOUT_SECS"))?,
            max_review_pages: parse_number("APPSCOUT_MAX_REVIEW_PAGES", var("APPSCOUT_MAX_REVIEW_PAGES"))?,
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Layer `over` on top of `self`.
    pub fn merge(self, over: ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            country: over.country.or(self.country),
            keywords: over.keywords.or(self.keywords),
            urls: over.urls.or(self.urls),
            review_urls: over.review_urls.or(self.review_urls),
            sink: over.sink.or(self.sink),
            result_dir: over.result_dir.or(self.result_dir),
            cloudflare_account_id: over.cloudflare_account_id.or(self.cloudflare_account_id),
            cloudflare_database_id: over.cloudflare_database_id.or(self.cloudflare_database_id),
            cloudflare_api_token: over.cloudflare_api_token.or(self.cloudflare_api_token),
            cloudflare_api_base: over.cloudflare_api_base.or(self.cloudflare_api_base),
            remote_database_url: over.remote_database_url.or(self.remote_database_url),
            user_agent: over.user_agent.or(self.user_agent),
            http_timeout_secs: over.http_timeout_secs.or(self.http_timeout_secs),
            max_review_pages: over.max_review_pages.or(self.max_review_pages),
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value })
    })
    .transpose()
}

/// Comma-delimited list, entries trimmed, blanks dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl PipelineConfig {
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let keyword_label = overrides
            .keywords
            .map(|k| k.trim().to_string())
            .unwrap_or_else(|| DEFAULT_KEYWORDS.to_string());
        let seed_keywords = split_list(&keyword_label);
        let listing_urls = overrides.urls.as_deref().map(split_list).unwrap_or_default();
        if seed_keywords.is_empty() && listing_urls.is_empty() {
            return Err(ConfigError::NothingToDo);
        }

        let sink_mode = match overrides.sink.as_deref() {
            Some(raw) => raw.parse::<SinkMode>()?,
            None => SinkMode::Local,
        };

        let remote = match overrides.remote_database_url {
            Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
                Some(RemoteStoreConfig::Postgres { database_url: url })
            }
            _ => match (
                overrides.cloudflare_account_id,
                overrides.cloudflare_database_id,
                overrides.cloudflare_api_token,
            ) {
                (Some(account_id), Some(database_id), Some(api_token)) => {
                    Some(RemoteStoreConfig::D1(D1Config {
                        account_id,
                        database_id,
                        api_token,
                        api_base: overrides
                            .cloudflare_api_base
                            .unwrap_or_else(|| D1_API_BASE.to_string()),
                    }))
                }
                _ => None,
            },
        };
        if sink_mode.writes_remote() && remote.is_none() {
            return Err(ConfigError::MissingRemote(sink_mode));
        }

        Ok(Self {
            country: overrides
                .country
                .map(|c| c.trim().to_string())
                .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            keyword_label,
            seed_keywords,
            listing_urls,
            review_urls: overrides
                .review_urls
                .as_deref()
                .map(split_list)
                .unwrap_or_default(),
            sink_mode,
            result_dir: overrides
                .result_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULT_DIR)),
            remote,
            user_agent: overrides
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: overrides
                .http_timeout_secs
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            max_review_pages: overrides.max_review_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = PipelineConfig::resolve(ConfigOverrides::default()).unwrap();
        assert_eq!(config.country, "us");
        assert_eq!(config.seed_keywords, vec!["bible".to_string()]);
        assert_eq!(config.sink_mode, SinkMode::Local);
        assert!(config.remote.is_none());
        assert_eq!(config.max_review_pages, None);
    }

    #[test]
    fn env_lists_are_split_and_trimmed() {
        let env = ConfigOverrides::from_vars(vars(&[
            ("KEYWORD", "bible, Bible ,,prayer"),
            ("URLS", "https://x/app/id1 , "),
            ("COUNTRY", "gb"),
            ("APPSCOUT_MAX_REVIEW_PAGES", "10"),
        ]))
        .unwrap();
        let config = PipelineConfig::resolve(env).unwrap();
        assert_eq!(config.keyword_label, "bible, Bible ,,prayer");
        assert_eq!(config.seed_keywords, vec!["bible", "Bible", "prayer"]);
        assert_eq!(config.listing_urls, vec!["https://x/app/id1"]);
        assert_eq!(config.country, "gb");
        assert_eq!(config.max_review_pages, Some(10));
        assert!(config.review_urls.is_empty());
    }

    #[test]
    fn review_urls_come_from_the_apple_package_variable() {
        let env = ConfigOverrides::from_vars(vars(&[(
            "APPLE_APP_PACKAGE_URL",
            "https://apps.apple.com/us/app/capcut/id1500855883, https://apps.apple.com/gb/app/x/id7",
        )]))
        .unwrap();
        let config = PipelineConfig::resolve(env).unwrap();
        assert_eq!(config.review_urls.len(), 2);
        assert_eq!(config.review_urls[1], "https://apps.apple.com/gb/app/x/id7");
    }

    #[test]
    fn remote_sink_requires_a_remote_store() {
        let env = ConfigOverrides::from_vars(vars(&[("SAVE_LOCATION", "both")])).unwrap();
        assert!(matches!(
            PipelineConfig::resolve(env),
            Err(ConfigError::MissingRemote(SinkMode::Both))
        ));

        let env = ConfigOverrides::from_vars(vars(&[
            ("SAVE_LOCATION", "d1"),
            ("CLOUDFLARE_ACCOUNT_ID", "acc"),
            ("CLOUDFLARE_D1_DATABASE_ID", "db"),
            ("CLOUDFLARE_API_TOKEN", "tok"),
        ]))
        .unwrap();
        let config = PipelineConfig::resolve(env).unwrap();
        assert_eq!(config.sink_mode, SinkMode::Remote);
        assert!(matches!(config.remote, Some(RemoteStoreConfig::D1(_))));

        let env = ConfigOverrides::from_vars(vars(&[
            ("SAVE_LOCATION", "remote"),
            ("REMOTE_DATABASE_URL", "postgres://u:p@localhost/apps"),
        ]))
        .unwrap();
        assert!(matches!(
            PipelineConfig::resolve(env).unwrap().remote,
            Some(RemoteStoreConfig::Postgres { .. })
        ));
    }

    #[test]
    fn unknown_sink_and_bad_numbers_are_rejected() {
        let env = ConfigOverrides::from_vars(vars(&[("SAVE_LOCATION", "s3")])).unwrap();
        assert!(matches!(PipelineConfig::resolve(env), Err(ConfigError::SinkMode(_))));

        let err = ConfigOverrides::from_vars(vars(&[("APPSCOUT_HTTP_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { key: "APPSCOUT_HTTP_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn later_layers_win() {
        let file: ConfigOverrides =
            serde_yaml::from_str("country: jp\nkeywords: manga\nsink: local\n").unwrap();
        let env = ConfigOverrides {
            country: Some("kr".into()),
            ..Default::default()
        };
        let merged = file.merge(env);
        assert_eq!(merged.country.as_deref(), Some("kr"));
        assert_eq!(merged.keywords.as_deref(), Some("manga"));
    }

    #[test]
    fn yaml_rejects_unknown_keys() {
        assert!(serde_yaml::from_str::<ConfigOverrides>("contry: us\n").is_err());
    }
}
