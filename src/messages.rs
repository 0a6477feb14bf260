//! Relational message store.
//!
//! Normalized messages are persisted in the SQLite `emails` table, keyed by
//! the provider's message id. A SHA-256 dedup hash over the stored fields
//! lets a re-sync tell unchanged messages apart from edited ones.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use mailrag_core::models::NormalizedMessage;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// What [`upsert_message`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Listing filter. All bounds are inclusive Unix timestamps (seconds).
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Case-insensitive substring of the sender.
    pub from: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Parse a `YYYY-MM-DD` bound into Unix seconds at the start (or the last
/// second) of that UTC day.
pub fn parse_day_bound(value: &str, end_of_day: bool) -> Result<i64> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc().timestamp())
        .ok_or_else(|| anyhow!("Invalid date '{}'", value))
}

pub fn dedup_hash(message: &NormalizedMessage) -> String {
    let mut hasher = Sha256::new();
    // Each field is NUL-terminated so adjacent fields cannot trade bytes.
    let mut field = |bytes: &[u8]| {
        hasher.update(bytes);
        hasher.update([0u8]);
    };
    field(message.id.as_bytes());
    field(message.thread_id.as_bytes());
    field(message.subject.as_bytes());
    field(message.from.as_bytes());
    field(&(message.to.len() as u64).to_le_bytes());
    for to in &message.to {
        field(to.as_bytes());
    }
    field(message.body.as_bytes());
    field(message.snippet.as_bytes());
    if let Some(date) = message.date {
        field(date.to_rfc3339().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub async fn upsert_message(pool: &SqlitePool, message: &NormalizedMessage) -> Result<UpsertOutcome> {
    let hash = dedup_hash(message);

    let existing: Option<String> = sqlx::query_scalar("SELECT dedup_hash FROM emails WHERE id = ?")
        .bind(&message.id)
        .fetch_optional(pool)
        .await?;

    if existing.as_deref() == Some(hash.as_str()) {
        return Ok(UpsertOutcome::Unchanged);
    }

    let to_json = serde_json::to_string(&message.to)?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO emails (id, thread_id, subject, from_address, to_json, snippet, body_text,
                            date, date_ts, dedup_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            thread_id = excluded.thread_id,
            subject = excluded.subject,
            from_address = excluded.from_address,
            to_json = excluded.to_json,
            snippet = excluded.snippet,
            body_text = excluded.body_text,
            date = excluded.date,
            date_ts = excluded.date_ts,
            dedup_hash = excluded.dedup_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&message.id)
    .bind(&message.thread_id)
    .bind(&message.subject)
    .bind(&message.from)
    .bind(&to_json)
    .bind(&message.snippet)
    .bind(&message.body)
    .bind(message.date.map(|d| d.to_rfc3339()))
    .bind(message.date.map(|d| d.timestamp()).unwrap_or(0))
    .bind(&hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to store message {}", message.id))?;

    Ok(if existing.is_some() {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Inserted
    })
}

const SELECT_COLUMNS: &str =
    "SELECT id, thread_id, subject, from_address, to_json, snippet, body_text, date FROM emails";

pub async fn get_message(pool: &SqlitePool, id: &str) -> Result<Option<NormalizedMessage>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_message).transpose()
}

/// Messages matching `filter`, newest first.
pub async fn list_messages(
    pool: &SqlitePool,
    filter: &MessageFilter,
    page: Pagination,
) -> Result<Vec<NormalizedMessage>> {
    let sql = format!(
        "{} {} ORDER BY date_ts DESC, id ASC LIMIT ? OFFSET ?",
        SELECT_COLUMNS, FILTER_CLAUSE
    );
    let rows = bind_filter(sqlx::query(&sql), filter)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_message).collect()
}

pub async fn count_messages(pool: &SqlitePool, filter: &MessageFilter) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) AS n FROM emails {}", FILTER_CLAUSE);
    let row = bind_filter(sqlx::query(&sql), filter)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

/// Delete one message. Returns whether a row was removed.
pub async fn delete_message(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM emails WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// Each optional bound is bound twice: once for the NULL check, once for
// the comparison.
const FILTER_CLAUSE: &str = r#"
    WHERE (? IS NULL OR from_address LIKE '%' || ? || '%')
      AND (? IS NULL OR date_ts >= ?)
      AND (? IS NULL OR date_ts <= ?)
"#;

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_filter<'q>(query: SqliteQuery<'q>, filter: &'q MessageFilter) -> SqliteQuery<'q> {
    query
        .bind(filter.from.as_deref())
        .bind(filter.from.as_deref())
        .bind(filter.since)
        .bind(filter.since)
        .bind(filter.until)
        .bind(filter.until)
}

fn row_to_message(row: &SqliteRow) -> Result<NormalizedMessage> {
    let to_json: String = row.get("to_json");
    let date: Option<String> = row.get("date");
    let date = date
        .map(|d| DateTime::<FixedOffset>::parse_from_rfc3339(&d))
        .transpose()
        .context("Stored message has an invalid date")?;

    Ok(NormalizedMessage {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        subject: row.get("subject"),
        from: row.get("from_address"),
        to: serde_json::from_str(&to_json).unwrap_or_default(),
        body: row.get("body_text"),
        snippet: row.get("snippet"),
        date,
    })
}
