//! Batched insert statements and the transports that execute them against a remote store.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const D1_API_BASE: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StatementError {
    pub message: String,
}

impl StatementError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A single bindable value. Text is always treated as untrusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn opt_text(value: Option<impl Into<String>>) -> Self {
        value.map_or(Self::Null, |v| Self::Text(v.into()))
    }

    /// Render as a SQL literal: quotes doubled, NUL removed.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(v) => v.to_string(),
            Self::Text(v) => {
                let mut out = String::with_capacity(v.len() + 2);
                out.push('\'');
                for ch in v.chars() {
                    match ch {
                        '\'' => out.push_str("''"),
                        '\0' => {}
                        other => out.push(other),
                    }
                }
                out.push('\'');
                out
            }
        }
    }

    fn fits(&self, sql_type: SqlType) -> bool {
        matches!(
            (self, sql_type),
            (Self::Null, _) | (Self::Integer(_), SqlType::Integer) | (Self::Text(_), SqlType::Text)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    fn pg_array(&self) -> &'static str {
        match self {
            Self::Text => "text[]",
            Self::Integer => "int8[]",
        }
    }
}

/// A fixed column of a remote table. The type decides how NULL is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
}

impl Column {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            sql_type: SqlType::Text,
        }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            sql_type: SqlType::Integer,
        }
    }
}

/// All values of one column, bound as a single typed array parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnArray {
    Text(Vec<Option<String>>),
    Integer(Vec<Option<i64>>),
}

impl ColumnArray {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(values) => values.len(),
            Self::Integer(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One `INSERT INTO .. VALUES (..), (..);` statement covering many rows.
///
/// Table and column names are fixed identifiers; row values are data and never
/// reach the SQL text unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertBatch {
    table: &'static str,
    columns: &'static [Column],
    rows: Vec<Vec<SqlValue>>,
}

impl InsertBatch {
    pub fn new(table: &'static str, columns: &'static [Column]) -> Self {
        Self {
            table,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<SqlValue>) -> Result<(), StatementError> {
        if row.len() != self.columns.len() {
            return Err(StatementError::new(format!(
                "row for {} has {} values, expected {}",
                self.table,
                row.len(),
                self.columns.len()
            )));
        }
        if let Some((column, _)) = self
            .columns
            .iter()
            .zip(&row)
            .find(|(column, value)| !value.fits(column.sql_type))
        {
            return Err(StatementError::new(format!(
                "value for {}.{} does not match its column type",
                self.table, column.name
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn columns(&self) -> &'static [Column] {
        self.columns
    }

    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `INSERT .. SELECT * FROM UNNEST($1::text[], ..)` with one array parameter per
    /// column, so the parameter count never grows with the row count. NUL is removed
    /// from text, which Postgres cannot store.
    pub fn to_unnest(&self) -> (String, Vec<ColumnArray>) {
        let casts = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, c)| format!("${}::{}", idx + 1, c.sql_type.pg_array()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) SELECT * FROM UNNEST({});",
            self.table,
            self.column_list(),
            casts
        );

        let arrays = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| match column.sql_type {
                SqlType::Text => ColumnArray::Text(
                    self.rows
                        .iter()
                        .map(|row| match &row[idx] {
                            SqlValue::Text(v) => Some(v.replace('\0', "")),
                            _ => None,
                        })
                        .collect(),
                ),
                SqlType::Integer => ColumnArray::Integer(
                    self.rows
                        .iter()
                        .map(|row| match &row[idx] {
                            SqlValue::Integer(v) => Some(*v),
                            _ => None,
                        })
                        .collect(),
                ),
            })
            .collect();
        (sql, arrays)
    }

    /// Statement text with every value embedded as an escaped literal.
    pub fn to_inline_sql(&self) -> String {
        let mut sql = format!("INSERT INTO {} ({}) VALUES ", self.table, self.column_list());
        for (row_idx, row) in self.rows.iter().enumerate() {
            if row_idx > 0 {
                sql.push_str(", ");
            }
            let values = row
                .iter()
                .map(SqlValue::to_literal)
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(sql, "({values})");
        }
        sql.push(';');
        sql
    }
}

/// Remote store transport: execute one statement, report success or failure.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    fn target(&self) -> String;

    async fn execute(&self, batch: &InsertBatch) -> Result<(), StatementError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct D1Config {
    pub account_id: String,
    pub database_id: String,
    pub api_token: String,
    pub api_base: String,
}

impl D1Config {
    pub fn query_url(&self) -> String {
        format!(
            "{}/accounts/{}/d1/database/{}/query",
            self.api_base.trim_end_matches('/'),
            self.account_id,
            self.database_id
        )
    }
}

#[derive(Debug, Deserialize)]
struct D1Response {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<D1Message>,
}

#[derive(Debug, Deserialize)]
struct D1Message {
    #[serde(default)]
    message: String,
}

/// Maps a D1 query API reply onto the executor contract.
pub fn interpret_d1_response(status: u16, body: &str) -> Result<(), StatementError> {
    if !(200..300).contains(&status) {
        return Err(StatementError::new(format!(
            "d1 query failed with status {status}: {body}"
        )));
    }
    let parsed: D1Response = serde_json::from_str(body)
        .map_err(|e| StatementError::new(format!("d1 response is not valid json: {e}")))?;
    if parsed.success {
        return Ok(());
    }
    let message = parsed
        .errors
        .first()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "d1 reported failure without a message".to_string());
    Err(StatementError::new(message))
}

/// Cloudflare D1 over its HTTP query API. Values are sent inline and escaped,
/// because the API caps bound parameters per statement.
#[derive(Debug)]
pub struct D1Executor {
    client: reqwest::Client,
    config: D1Config,
}

impl D1Executor {
    pub fn new(config: D1Config, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building d1 http client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl StatementExecutor for D1Executor {
    fn target(&self) -> String {
        format!("d1:{}", self.config.database_id)
    }

    async fn execute(&self, batch: &InsertBatch) -> Result<(), StatementError> {
        let sql = batch.to_inline_sql();
        let span = info_span!("d1_execute", table = batch.table(), rows = batch.len());
        async {
            debug!(bytes = sql.len(), "posting statement");
            let resp = self
                .client
                .post(self.config.query_url())
                .bearer_auth(&self.config.api_token)
                .json(&serde_json::json!({ "sql": sql }))
                .send()
                .await
                .map_err(|e| StatementError::new(format!("d1 request failed: {e}")))?;
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .map_err(|e| StatementError::new(format!("reading d1 response: {e}")))?;
            interpret_d1_response(status, &body)
        }
        .instrument(span)
        .await
    }
}

/// Postgres through sqlx. Each column is bound as one typed array, so a NULL in an
/// integer column arrives as an integer NULL.
#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(database_url)
            .context("configuring postgres pool")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StatementExecutor for PostgresExecutor {
    fn target(&self) -> String {
        "postgres".to_string()
    }

    async fn execute(&self, batch: &InsertBatch) -> Result<(), StatementError> {
        let (sql, arrays) = batch.to_unnest();
        let mut query = sqlx::query(&sql);
        for array in arrays {
            query = match array {
                ColumnArray::Text(values) => query.bind(values),
                ColumnArray::Integer(values) => query.bind(values),
            };
        }
        query
            .execute(&self.pool)
            .instrument(info_span!("postgres_execute", table = batch.table(), rows = batch.len()))
            .await
            .map(|_| ())
            .map_err(|e| StatementError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[Column] = &[
        Column::text("appid"),
        Column::text("userName"),
        Column::integer("score"),
    ];

    fn batch() -> InsertBatch {
        let mut batch = InsertBatch::new("ios_review_data", COLUMNS);
        batch
            .push_row(vec![
                SqlValue::text("1"),
                SqlValue::text("O'Brien"),
                SqlValue::Integer(5),
            ])
            .unwrap();
        batch
            .push_row(vec![SqlValue::text("2"), SqlValue::Null, SqlValue::Integer(1)])
            .unwrap();
        batch
    }

    #[test]
    fn inline_rendering_doubles_quotes() {
        assert_eq!(
            batch().to_inline_sql(),
            "INSERT INTO ios_review_data (appid, userName, score) VALUES ('1', 'O''Brien', 5), ('2', NULL, 1);"
        );
    }

    #[test]
    fn inline_rendering_cannot_be_terminated_early() {
        let hostile = SqlValue::text("x'); DROP TABLE ios_review_data; --\0");
        let literal = hostile.to_literal();
        let inner = &literal[1..literal.len() - 1];
        // Every quote inside the literal is part of a doubled pair.
        assert_eq!(inner.matches('\'').count() % 2, 0);
        assert!(!inner.replace("''", "").contains('\''));
        assert!(!literal.contains('\0'));
    }

    #[test]
    fn unnest_rendering_binds_one_typed_array_per_column() {
        let (sql, arrays) = batch().to_unnest();
        assert_eq!(
            sql,
            "INSERT INTO ios_review_data (appid, userName, score) SELECT * FROM UNNEST($1::text[], $2::text[], $3::int8[]);"
        );
        assert!(!sql.contains("Brien"));
        assert_eq!(
            arrays,
            vec![
                ColumnArray::Text(vec![Some("1".into()), Some("2".into())]),
                ColumnArray::Text(vec![Some("O'Brien".into()), None]),
                ColumnArray::Integer(vec![Some(5), Some(1)]),
            ]
        );
    }

    #[test]
    fn null_in_integer_column_stays_an_integer_null() {
        const RANKED: &[Column] = &[Column::text("appid"), Column::integer("rank")];
        let mut batch = InsertBatch::new("ios_app_data", RANKED);
        batch
            .push_row(vec![SqlValue::text("1\0"), SqlValue::Null])
            .unwrap();
        let (sql, arrays) = batch.to_unnest();
        assert!(sql.contains("$2::int8[]"));
        assert_eq!(arrays[0], ColumnArray::Text(vec![Some("1".into())]));
        assert_eq!(arrays[1], ColumnArray::Integer(vec![None]));
    }

    #[test]
    fn parameter_count_does_not_grow_with_rows() {
        let mut batch = InsertBatch::new("ios_review_data", COLUMNS);
        for i in 0..8_192 {
            batch
                .push_row(vec![
                    SqlValue::text(i.to_string()),
                    SqlValue::text("O'Brien"),
                    SqlValue::Integer(5),
                ])
                .unwrap();
        }
        let (sql, arrays) = batch.to_unnest();
        assert_eq!(arrays.len(), COLUMNS.len());
        assert!(arrays.iter().all(|a| a.len() == 8_192));
        assert!(sql.contains("$3::") && !sql.contains("$4"));
    }

    #[test]
    fn rows_must_match_column_count_and_types() {
        let mut batch = InsertBatch::new("ios_review_data", COLUMNS);
        assert!(batch.push_row(vec![SqlValue::Null]).is_err());
        assert!(batch
            .push_row(vec![SqlValue::text("1"), SqlValue::text("a"), SqlValue::text("5")])
            .is_err());
        assert!(batch.is_empty());
    }

    #[test]
    fn d1_replies_are_interpreted() {
        assert!(interpret_d1_response(200, r#"{"success":true,"errors":[]}"#).is_ok());
        let err = interpret_d1_response(
            200,
            r#"{"success":false,"errors":[{"message":"no such table: ios_app_data"}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.message, "no such table: ios_app_data");
        let err = interpret_d1_response(401, "unauthorized").unwrap_err();
        assert!(err.message.contains("401"));
    }

    #[test]
    fn d1_query_url_is_built_from_ids() {
        let config = D1Config {
            account_id: "acc".into(),
            database_id: "db".into(),
            api_token: "tok".into(),
            api_base: format!("{D1_API_BASE}/"),
        };
        assert_eq!(
            config.query_url(),
            "https://api.cloudflare.com/client/v4/accounts/acc/d1/database/db/query"
        );
    }
}
