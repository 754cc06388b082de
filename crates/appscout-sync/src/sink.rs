//! Persistence sinks: local JSON files and batched inserts into the remote store.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use appscout_core::{canonical_instant, AppRecord, ReviewRecord, RunOutput, RunStamp, SinkMode};
use appscout_storage::{
    Column, InsertBatch, OutputStore, SqlValue, StatementError, StatementExecutor, StoredArtifact,
};
use arrow_array::{Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use thiserror::Error;
use tracing::{error, info};

pub const APP_TABLE: &str = "ios_app_data";
pub const REVIEW_TABLE: &str = "ios_review_data";

pub const APP_COLUMNS: &[Column] = &[
    Column::text("platform"),
    Column::text("type"),
    Column::text("cid"),
    Column::text("cname"),
    Column::integer("rank"),
    Column::text("appid"),
    Column::text("appname"),
    Column::text("icon"),
    Column::text("link"),
    Column::text("title"),
    Column::text("updateAt"),
    Column::text("country"),
    Column::text("alsoBought"),
];

pub const REVIEW_COLUMNS: &[Column] = &[
    Column::text("appid"),
    Column::text("appname"),
    Column::text("country"),
    Column::text("keyword"),
    Column::integer("score"),
    Column::text("userName"),
    Column::text("date"),
    Column::text("review"),
];

/// Delimiter used when related identifiers are flattened into one text column.
pub const RELATED_IDS_DELIMITER: &str = ",";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("local write failed: {0:#}")]
    Local(anyhow::Error),
    #[error("tabular artifact failed: {0:#}")]
    Tabular(anyhow::Error),
    /// Only reachable when a [`PersistenceSink`] is built by hand without an executor;
    /// resolved configuration rejects a remote sink mode with no store.
    #[error("no remote store configured")]
    Unconfigured,
    #[error("insert into {table} failed: {source}")]
    Statement {
        table: &'static str,
        #[source]
        source: StatementError,
    },
}

#[derive(Debug, Clone)]
pub struct LocalWriteReport {
    pub app_details: StoredArtifact,
    pub reviews: StoredArtifact,
}

#[derive(Debug, Clone)]
pub struct RemoteWriteReport {
    pub target: String,
    pub tabular_artifact: StoredArtifact,
    pub app_rows: usize,
    pub review_rows: usize,
}

/// Outcome per sink; `None` means the sink was not selected.
#[derive(Debug, Default)]
pub struct SinkReport {
    pub local: Option<Result<LocalWriteReport, SinkError>>,
    pub remote: Option<Result<RemoteWriteReport, SinkError>>,
}

impl SinkReport {
    pub fn failures(&self) -> Vec<&SinkError> {
        let local = self.local.as_ref().and_then(|r| r.as_ref().err());
        let remote = self.remote.as_ref().and_then(|r| r.as_ref().err());
        local.into_iter().chain(remote).collect()
    }

    pub fn is_success(&self) -> bool {
        self.failures().is_empty()
    }
}

pub fn app_details_file_name(stamp: &RunStamp) -> String {
    format!("app-details-{}.json", stamp.file_stamp())
}

pub fn reviews_file_name(keyword_label: &str, stamp: &RunStamp) -> String {
    let keyword: String = keyword_label
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{}-app-reviews-{}.json", keyword, stamp.file_stamp())
}

pub fn tabular_file_name(stamp: &RunStamp) -> String {
    format!("app_data_{}.parquet", stamp.file_stamp())
}

/// Flat, tabular form of an [`AppRecord`] as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRow {
    pub platform: String,
    pub listing_type: String,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub rank: Option<i64>,
    pub app_id: String,
    pub name: String,
    pub icon: String,
    pub link: String,
    pub description: String,
    pub updated_at: String,
    pub country: String,
    pub related_ids: String,
}

impl From<&AppRecord> for AppRow {
    fn from(app: &AppRecord) -> Self {
        Self {
            platform: app.platform.clone(),
            listing_type: app.listing_type.as_str().to_string(),
            category_id: app.category_id.clone(),
            category_name: app.category_name.clone(),
            rank: app.rank.map(i64::from),
            app_id: app.app_id.clone(),
            name: app.name.clone(),
            icon: app.icon.clone(),
            link: app.link.clone(),
            description: app.description.clone(),
            updated_at: canonical_instant(app.captured_at),
            country: app.country.clone(),
            related_ids: app.related_ids.join(RELATED_IDS_DELIMITER),
        }
    }
}

impl AppRow {
    fn into_values(self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.platform),
            SqlValue::Text(self.listing_type),
            SqlValue::opt_text(self.category_id),
            SqlValue::opt_text(self.category_name),
            self.rank.map_or(SqlValue::Null, SqlValue::Integer),
            SqlValue::Text(self.app_id),
            SqlValue::Text(self.name),
            SqlValue::Text(self.icon),
            SqlValue::Text(self.link),
            SqlValue::Text(self.description),
            SqlValue::Text(self.updated_at),
            SqlValue::Text(self.country),
            SqlValue::Text(self.related_ids),
        ]
    }
}

fn app_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        ArrowField::new("platform", DataType::Utf8, false),
        ArrowField::new("type", DataType::Utf8, false),
        ArrowField::new("cid", DataType::Utf8, true),
        ArrowField::new("cname", DataType::Utf8, true),
        ArrowField::new("rank", DataType::Int64, true),
        ArrowField::new("appid", DataType::Utf8, false),
        ArrowField::new("appname", DataType::Utf8, false),
        ArrowField::new("icon", DataType::Utf8, false),
        ArrowField::new("link", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("updateAt", DataType::Utf8, false),
        ArrowField::new("country", DataType::Utf8, false),
        ArrowField::new("alsoBought", DataType::Utf8, false),
    ]))
}

fn required_strings<'r>(rows: &'r [AppRow], f: impl Fn(&'r AppRow) -> &'r str) -> StringArray {
    StringArray::from(rows.iter().map(|r| Some(f(r))).collect::<Vec<_>>())
}

fn optional_strings<'r>(rows: &'r [AppRow], f: impl Fn(&'r AppRow) -> Option<&'r str>) -> StringArray {
    StringArray::from(rows.iter().map(f).collect::<Vec<_>>())
}

/// Encode app rows as a single-batch parquet file.
pub fn encode_app_rows(rows: &[AppRow]) -> Result<Vec<u8>> {
    let batch = RecordBatch::try_new(
        app_schema(),
        vec![
            Arc::new(required_strings(rows, |r| r.platform.as_str())),
            Arc::new(required_strings(rows, |r| r.listing_type.as_str())),
            Arc::new(optional_strings(rows, |r| r.category_id.as_deref())),
            Arc::new(optional_strings(rows, |r| r.category_name.as_deref())),
            Arc::new(Int64Array::from(rows.iter().map(|r| r.rank).collect::<Vec<_>>())),
            Arc::new(required_strings(rows, |r| r.app_id.as_str())),
            Arc::new(required_strings(rows, |r| r.name.as_str())),
            Arc::new(required_strings(rows, |r| r.icon.as_str())),
            Arc::new(required_strings(rows, |r| r.link.as_str())),
            Arc::new(required_strings(rows, |r| r.description.as_str())),
            Arc::new(required_strings(rows, |r| r.updated_at.as_str())),
            Arc::new(required_strings(rows, |r| r.country.as_str())),
            Arc::new(required_strings(rows, |r| r.related_ids.as_str())),
        ],
    )
    .context("building app record batch")?;

    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), None)
        .context("opening parquet writer")?;
    writer.write(&batch).context("writing app record batch")?;
    writer.into_inner().context("closing parquet writer")
}

fn string_column<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("column {name} missing or not utf8"))
}

fn read_string(col: &StringArray, idx: usize) -> Option<String> {
    (!col.is_null(idx)).then(|| col.value(idx).to_string())
}

/// Read app rows back from a parquet file written by [`encode_app_rows`].
pub fn decode_app_rows(path: &Path) -> Result<Vec<AppRow>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata {}", path.display()))?
        .build()
        .with_context(|| format!("building parquet reader {}", path.display()))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("reading record batch {}", path.display()))?;
        let platform = string_column(&batch, "platform")?;
        let listing_type = string_column(&batch, "type")?;
        let cid = string_column(&batch, "cid")?;
        let cname = string_column(&batch, "cname")?;
        let app_id = string_column(&batch, "appid")?;
        let name = string_column(&batch, "appname")?;
        let icon = string_column(&batch, "icon")?;
        let link = string_column(&batch, "link")?;
        let description = string_column(&batch, "title")?;
        let updated_at = string_column(&batch, "updateAt")?;
        let country = string_column(&batch, "country")?;
        let related = string_column(&batch, "alsoBought")?;
        let rank = batch
            .column_by_name("rank")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| anyhow!("column rank missing or not int64"))?;

        for i in 0..batch.num_rows() {
            rows.push(AppRow {
                platform: platform.value(i).to_string(),
                listing_type: listing_type.value(i).to_string(),
                category_id: read_string(cid, i),
                category_name: read_string(cname, i),
                rank: (!rank.is_null(i)).then(|| rank.value(i)),
                app_id: app_id.value(i).to_string(),
                name: name.value(i).to_string(),
                icon: icon.value(i).to_string(),
                link: link.value(i).to_string(),
                description: description.value(i).to_string(),
                updated_at: updated_at.value(i).to_string(),
                country: country.value(i).to_string(),
                related_ids: related.value(i).to_string(),
            });
        }
    }
    Ok(rows)
}

pub fn app_insert_batch(rows: Vec<AppRow>) -> Result<InsertBatch, StatementError> {
    let mut batch = InsertBatch::new(APP_TABLE, APP_COLUMNS);
    for row in rows {
        batch.push_row(row.into_values())?;
    }
    Ok(batch)
}

pub fn review_insert_batch(reviews: &[ReviewRecord]) -> Result<InsertBatch, StatementError> {
    let mut batch = InsertBatch::new(REVIEW_TABLE, REVIEW_COLUMNS);
    for review in reviews {
        batch.push_row(vec![
            SqlValue::text(&review.app_id),
            SqlValue::text(&review.app_name),
            SqlValue::text(&review.country),
            SqlValue::text(&review.keyword),
            SqlValue::Integer(i64::from(review.score)),
            SqlValue::text(&review.user_name),
            SqlValue::text(canonical_instant(review.date)),
            SqlValue::text(&review.review),
        ])?;
    }
    Ok(batch)
}

/// Writes a [`RunOutput`] to the sinks a [`SinkMode`] selects. Each sink runs
/// independently; a failure in one never prevents the other from being attempted.
pub struct PersistenceSink<'a> {
    store: &'a OutputStore,
    executor: Option<&'a dyn StatementExecutor>,
}

impl<'a> PersistenceSink<'a> {
    pub fn new(store: &'a OutputStore, executor: Option<&'a dyn StatementExecutor>) -> Self {
        Self { store, executor }
    }

    pub async fn persist(
        &self,
        output: &RunOutput,
        mode: SinkMode,
        stamp: &RunStamp,
        keyword_label: &str,
    ) -> SinkReport {
        let mut report = SinkReport::default();

        if mode.writes_local() {
            let result = self.write_local(output, stamp, keyword_label).await;
            match &result {
                Ok(local) => info!(
                    app_details = %local.app_details.absolute_path.display(),
                    reviews = %local.reviews.absolute_path.display(),
                    "local files written"
                ),
                Err(err) => error!(error = %err, "local sink failed"),
            }
            report.local = Some(result);
        }

        if mode.writes_remote() {
            let result = match self.executor {
                Some(executor) => self.write_remote(executor, output, stamp).await,
                None => Err(SinkError::Unconfigured),
            };
            match &result {
                Ok(remote) => info!(
                    store = %remote.target,
                    app_rows = remote.app_rows,
                    review_rows = remote.review_rows,
                    "remote store updated"
                ),
                Err(err) => error!(error = %err, "remote sink failed"),
            }
            report.remote = Some(result);
        }

        report
    }

    pub async fn write_local(
        &self,
        output: &RunOutput,
        stamp: &RunStamp,
        keyword_label: &str,
    ) -> Result<LocalWriteReport, SinkError> {
        let apps = serde_json::to_vec_pretty(&output.apps)
            .context("serializing app details")
            .map_err(SinkError::Local)?;
        let app_details = self
            .store
            .write_file(&app_details_file_name(stamp), &apps)
            .await
            .map_err(SinkError::Local)?;

        let reviews = serde_json::to_vec_pretty(&output.reviews)
            .context("serializing reviews")
            .map_err(SinkError::Local)?;
        let reviews = self
            .store
            .write_file(&reviews_file_name(keyword_label, stamp), &reviews)
            .await
            .map_err(SinkError::Local)?;

        Ok(LocalWriteReport {
            app_details,
            reviews,
        })
    }

    /// Apps go through the tabular artifact and one statement; reviews, if any, in a second
    /// statement. A failed app statement aborts the remote write.
    pub async fn write_remote(
        &self,
        executor: &dyn StatementExecutor,
        output: &RunOutput,
        stamp: &RunStamp,
    ) -> Result<RemoteWriteReport, SinkError> {
        let rows: Vec<AppRow> = output.apps.iter().map(AppRow::from).collect();
        let bytes = encode_app_rows(&rows).map_err(SinkError::Tabular)?;
        let tabular_artifact = self
            .store
            .write_file(&tabular_file_name(stamp), &bytes)
            .await
            .map_err(SinkError::Tabular)?;
        let rows = decode_app_rows(&tabular_artifact.absolute_path).map_err(SinkError::Tabular)?;
        let app_rows = rows.len();

        if app_rows > 0 {
            let batch = app_insert_batch(rows).map_err(|source| SinkError::Statement {
                table: APP_TABLE,
                source,
            })?;
            executor
                .execute(&batch)
                .await
                .map_err(|source| SinkError::Statement {
                    table: APP_TABLE,
                    source,
                })?;
        }

        let review_rows = output.reviews.len();
        if review_rows > 0 {
            let batch = review_insert_batch(&output.reviews).map_err(|source| {
                SinkError::Statement {
                    table: REVIEW_TABLE,
                    source,
                }
            })?;
            executor
                .execute(&batch)
                .await
                .map_err(|source| SinkError::Statement {
                    table: REVIEW_TABLE,
                    source,
                })?;
        }

        Ok(RemoteWriteReport {
            target: executor.target(),
            tabular_artifact,
            app_rows,
            review_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appscout_core::{ListingType, PLATFORM_IOS};
    use appscout_storage::ColumnArray;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn stamp() -> RunStamp {
        RunStamp::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).single().unwrap())
    }

    fn app(id: &str, related: &[&str]) -> AppRecord {
        AppRecord {
            platform: PLATFORM_IOS.into(),
            country: "us".into(),
            listing_type: ListingType::TopFree,
            category_id: None,
            category_name: None,
            name: format!("App {id}"),
            rank: None,
            app_id: id.into(),
            icon: "https://i/icon.png".into(),
            link: format!("https://apps.apple.com/us/app/id{id}"),
            description: "It's the 'best' app".into(),
            captured_at: stamp().instant(),
            related_ids: related.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn review(id: &str, user: &str, text: &str) -> ReviewRecord {
        ReviewRecord {
            app_id: id.into(),
            app_name: format!("App {id}"),
            country: "us".into(),
            keyword: "bible".into(),
            score: 5,
            user_name: user.into(),
            date: stamp().instant(),
            review: text.into(),
        }
    }

    fn output() -> RunOutput {
        RunOutput {
            apps: vec![app("1", &["2", "3"]), app("2", &[])],
            reviews: vec![review("1", "O'Brien", "Can't stop reading"), review("2", "Bo", "ok")],
        }
    }

    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<InsertBatch>>,
        fail_table: Option<&'static str>,
    }

    #[async_trait]
    impl StatementExecutor for Recorder {
        fn target(&self) -> String {
            "recorder".into()
        }

        async fn execute(&self, batch: &InsertBatch) -> Result<(), StatementError> {
            if self.fail_table == Some(batch.table()) {
                return Err(StatementError::new("SQLITE_ERROR: forced"));
            }
            self.executed.lock().unwrap().push(batch.clone());
            Ok(())
        }
    }

    #[test]
    fn tabular_form_flattens_related_ids() {
        let rows: Vec<AppRow> = output().apps.iter().map(AppRow::from).collect();
        assert_eq!(rows[0].related_ids, "2,3");
        assert_eq!(rows[1].related_ids, "");
        assert_eq!(rows[0].updated_at, "2024-05-01T10:20:30.000Z");
        assert_eq!(rows[0].listing_type, "top-free");
    }

    #[test]
    fn parquet_artifact_preserves_rows() {
        let dir = tempdir().unwrap();
        let mut rows: Vec<AppRow> = output().apps.iter().map(AppRow::from).collect();
        rows[1].category_name = Some("Books".into());
        rows[1].rank = Some(3);
        let path = dir.path().join("apps.parquet");
        std::fs::write(&path, encode_app_rows(&rows).unwrap()).unwrap();
        assert_eq!(decode_app_rows(&path).unwrap(), rows);
    }

    #[test]
    fn quotes_in_review_text_do_not_break_statements() {
        let reviews = vec![review("1", "O'Brien", "it's ''fine'' ');--")];
        let batch = review_insert_batch(&reviews).unwrap();

        let inline = batch.to_inline_sql();
        assert!(inline.contains("'O''Brien'"));
        assert!(inline.contains("'it''s ''''fine'''' '');--'"));
        assert!(inline.ends_with(");"));

        let (sql, arrays) = batch.to_unnest();
        assert!(!sql.contains("Brien"));
        assert_eq!(arrays[5], ColumnArray::Text(vec![Some("O'Brien".into())]));
    }

    #[test]
    fn reviews_file_name_keeps_keyword_but_not_separators() {
        assert_eq!(
            reviews_file_name("bible,prayer", &stamp()),
            "bible,prayer-app-reviews-2024-05-01T10-20-30-000Z.json"
        );
        assert!(!reviews_file_name("a/b", &stamp()).contains('/'));
    }

    #[tokio::test]
    async fn local_writes_are_byte_identical_across_runs() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path());
        let sink = PersistenceSink::new(&store, None);

        let first = sink.write_local(&output(), &stamp(), "bible").await.unwrap();
        let first_bytes = std::fs::read(&first.reviews.absolute_path).unwrap();
        let second = sink.write_local(&output(), &stamp(), "bible").await.unwrap();

        assert_eq!(first.app_details.content_hash, second.app_details.content_hash);
        assert_eq!(std::fs::read(&second.reviews.absolute_path).unwrap(), first_bytes);
        let apps: Vec<AppRecord> =
            serde_json::from_slice(&std::fs::read(&second.app_details.absolute_path).unwrap()).unwrap();
        assert_eq!(apps, output().apps);
        assert_eq!(apps[0].related_ids, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn remote_write_issues_one_statement_per_table() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path());
        let recorder = Recorder::default();
        let sink = PersistenceSink::new(&store, Some(&recorder));

        let report = sink.persist(&output(), SinkMode::Remote, &stamp(), "bible").await;
        assert!(report.local.is_none());
        let remote = report.remote.unwrap().unwrap();
        assert_eq!((remote.app_rows, remote.review_rows), (2, 2));
        assert!(remote.tabular_artifact.absolute_path.exists());

        let executed = recorder.executed.lock().unwrap();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0].table(), APP_TABLE);
        assert_eq!(executed[0].len(), 2);
        assert_eq!(executed[1].table(), REVIEW_TABLE);
        // Same data on both sides: the app ids bound remotely match the local records.
        let remote_ids: Vec<_> = executed[0].rows().iter().map(|r| r[5].clone()).collect();
        assert_eq!(remote_ids, vec![SqlValue::text("1"), SqlValue::text("2")]);
    }

    #[tokio::test]
    async fn reviews_statement_is_skipped_when_there_are_no_reviews() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path());
        let recorder = Recorder::default();
        let sink = PersistenceSink::new(&store, Some(&recorder));
        let out = RunOutput {
            apps: vec![app("1", &[])],
            reviews: vec![],
        };

        let report = sink.persist(&out, SinkMode::Remote, &stamp(), "bible").await;
        assert!(report.is_success());
        assert_eq!(recorder.executed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_app_statement_keeps_local_files_in_both_mode() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path());
        let recorder = Recorder {
            fail_table: Some(APP_TABLE),
            ..Default::default()
        };
        let sink = PersistenceSink::new(&store, Some(&recorder));

        let report = sink.persist(&output(), SinkMode::Both, &stamp(), "bible").await;
        assert!(!report.is_success());
        assert!(matches!(
            report.remote,
            Some(Err(SinkError::Statement { table: APP_TABLE, .. }))
        ));
        // Reviews statement is never attempted once the app statement failed.
        assert!(recorder.executed.lock().unwrap().is_empty());

        let local = report.local.unwrap().unwrap();
        let apps: Vec<AppRecord> =
            serde_json::from_slice(&std::fs::read(&local.app_details.absolute_path).unwrap()).unwrap();
        let reviews: Vec<ReviewRecord> =
            serde_json::from_slice(&std::fs::read(&local.reviews.absolute_path).unwrap()).unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(reviews.len(), 2);
    }

    #[tokio::test]
    async fn failed_review_statement_is_reported_after_apps_were_inserted() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path());
        let recorder = Recorder {
            fail_table: Some(REVIEW_TABLE),
            ..Default::default()
        };
        let sink = PersistenceSink::new(&store, Some(&recorder));

        let report = sink.persist(&output(), SinkMode::Remote, &stamp(), "bible").await;
        let err = report.remote.unwrap().unwrap_err();
        assert!(matches!(err, SinkError::Statement { table: REVIEW_TABLE, .. }));
        assert!(err.to_string().contains("ios_review_data"));

        let executed = recorder.executed.lock().unwrap();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].table(), APP_TABLE);
        assert_eq!(executed[0].len(), 2);
    }

    #[test]
    fn app_rank_binds_as_an_integer_column() {
        let rows: Vec<AppRow> = output().apps.iter().map(AppRow::from).collect();
        let (sql, arrays) = app_insert_batch(rows).unwrap().to_unnest();
        assert!(sql.contains("$5::int8[]"));
        assert_eq!(arrays[4], ColumnArray::Integer(vec![None, None]));
    }

    #[tokio::test]
    async fn missing_executor_fails_only_the_remote_sink() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path());
        let sink = PersistenceSink::new(&store, None);

        let report = sink.persist(&output(), SinkMode::Both, &stamp(), "bible").await;
        assert!(report.local.as_ref().unwrap().is_ok());
        assert!(matches!(report.remote, Some(Err(SinkError::Unconfigured))));
        assert_eq!(report.failures().len(), 1);
    }
}
