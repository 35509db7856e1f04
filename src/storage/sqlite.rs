use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PrismResult;

use super::models::{RecordFilter, RecordStats, RequestRecord};
use super::Repository;

/// SQLite-backed record store.
///
/// WAL journaling keeps reads responsive while the single writer upserts;
/// writes are serialized by SQLite itself, which is why the async stage runs
/// exactly one worker.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if missing) the database at `db_path` and run schema
    /// migration. `":memory:"` opens an in-memory database.
    pub async fn new(db_path: &str) -> PrismResult<Self> {
        let pool = if db_path == ":memory:" {
            // A pool of in-memory connections would be independent databases.
            let options = "sqlite::memory:"
                .parse::<SqliteConnectOptions>()?
                .pragma("case_sensitive_like", "ON");
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_millis(5000))
                // Path filters use LIKE and must match case-sensitively.
                .pragma("case_sensitive_like", "ON");
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let repo = Self { pool };
        repo.migrate().await?;

        info!("Database initialized at {}", db_path);
        Ok(repo)
    }

    async fn migrate(&self) -> PrismResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request_logs (
                id TEXT PRIMARY KEY,
                created_at DATETIME NOT NULL,
                upstream TEXT NOT NULL,
                target_url TEXT NOT NULL,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                query TEXT,
                request_headers TEXT,
                request_body TEXT,
                request_body_ref TEXT,
                request_body_size INTEGER DEFAULT 0,
                status_code INTEGER DEFAULT 0,
                response_headers TEXT,
                response_body TEXT,
                response_body_ref TEXT,
                response_body_size INTEGER DEFAULT 0,
                streaming INTEGER DEFAULT 0,
                latency_ms INTEGER DEFAULT 0,
                error TEXT,
                truncated INTEGER DEFAULT 0,
                tag TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_logs_created_at ON request_logs(created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_logs_upstream ON request_logs(upstream)",
            "CREATE INDEX IF NOT EXISTS idx_logs_status_code ON request_logs(status_code)",
            "CREATE INDEX IF NOT EXISTS idx_logs_method ON request_logs(method)",
        ];
        for stmt in indexes {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        // Backward-compatible migration for databases created before these
        // columns existed.
        self.ensure_column("request_body_ref", "request_body_ref TEXT")
            .await?;
        self.ensure_column("response_body_ref", "response_body_ref TEXT")
            .await?;
        self.ensure_column("tag", "tag TEXT").await?;

        Ok(())
    }

    async fn ensure_column(&self, name: &str, definition: &str) -> PrismResult<()> {
        if self.has_column(name).await? {
            return Ok(());
        }
        sqlx::query(&format!(
            "ALTER TABLE request_logs ADD COLUMN {}",
            definition
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_column(&self, name: &str) -> PrismResult<bool> {
        let rows = sqlx::query("PRAGMA table_info(request_logs)")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let col: String = row.try_get("name")?;
            if col == name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// All distinct blob refs referenced by log rows; feeds the blob GC.
    pub async fn list_blob_refs(&self) -> PrismResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT request_body_ref AS ref
            FROM request_logs
            WHERE request_body_ref IS NOT NULL AND request_body_ref != ''
            UNION
            SELECT response_body_ref AS ref
            FROM request_logs
            WHERE response_body_ref IS NOT NULL AND response_body_ref != ''
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut refs = Vec::with_capacity(rows.len());
        for row in rows {
            let blob_ref: String = row.try_get("ref")?;
            if !blob_ref.is_empty() {
                refs.push(blob_ref);
            }
        }
        Ok(refs)
    }
}

fn push_where(qb: &mut QueryBuilder<Sqlite>, first: &mut bool) {
    if *first {
        qb.push(" WHERE ");
        *first = false;
    } else {
        qb.push(" AND ");
    }
}

fn push_filter(qb: &mut QueryBuilder<Sqlite>, filter: &RecordFilter) {
    let mut first = true;
    if let Some(upstream) = &filter.upstream {
        push_where(qb, &mut first);
        qb.push("upstream = ").push_bind(upstream.clone());
    }
    if let Some(method) = &filter.method {
        push_where(qb, &mut first);
        qb.push("method = ").push_bind(method.clone());
    }
    if let Some(status_code) = filter.status_code {
        push_where(qb, &mut first);
        qb.push("status_code = ").push_bind(status_code as i32);
    }
    if let Some(path) = &filter.path {
        push_where(qb, &mut first);
        qb.push("path LIKE ").push_bind(format!("%{}%", path));
    }
    if let Some(tag) = &filter.tag {
        push_where(qb, &mut first);
        qb.push("tag = ").push_bind(tag.clone());
    }
    if let Some(start) = filter.start_time {
        push_where(qb, &mut first);
        qb.push("created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end_time {
        push_where(qb, &mut first);
        qb.push("created_at <= ").push_bind(end);
    }
    if let Some(has_error) = filter.has_error {
        push_where(qb, &mut first);
        if has_error {
            qb.push("(error IS NOT NULL AND error != '')");
        } else {
            qb.push("(error IS NULL OR error = '')");
        }
    }
    if let Some(streaming) = filter.streaming {
        push_where(qb, &mut first);
        qb.push("streaming = ").push_bind(streaming);
    }
}

fn scan_summary(row: &SqliteRow) -> PrismResult<RequestRecord> {
    Ok(RequestRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        upstream: row.try_get("upstream")?,
        target_url: row.try_get("target_url")?,
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        query: row.try_get::<Option<String>, _>("query")?.unwrap_or_default(),
        request_body_size: row.try_get("request_body_size")?,
        status_code: row.try_get::<i32, _>("status_code")? as u16,
        response_body_size: row.try_get("response_body_size")?,
        streaming: row.try_get("streaming")?,
        latency_ms: row.try_get("latency_ms")?,
        error: row.try_get::<Option<String>, _>("error")?.unwrap_or_default(),
        truncated: row.try_get("truncated")?,
        tag: row.try_get::<Option<String>, _>("tag")?.unwrap_or_default(),
        ..RequestRecord::default()
    })
}

fn scan_record(row: &SqliteRow) -> PrismResult<RequestRecord> {
    let mut record = scan_summary(row)?;

    record.request_body = row
        .try_get::<Option<String>, _>("request_body")?
        .unwrap_or_default();
    record.request_body_ref = row
        .try_get::<Option<String>, _>("request_body_ref")?
        .unwrap_or_default();
    record.response_body = row
        .try_get::<Option<String>, _>("response_body")?
        .unwrap_or_default();
    record.response_body_ref = row
        .try_get::<Option<String>, _>("response_body_ref")?
        .unwrap_or_default();

    let request_headers: Option<String> = row.try_get("request_headers")?;
    if let Some(raw) = request_headers {
        if !raw.is_empty() && raw != "null" {
            record.request_headers =
                serde_json::from_str::<HashMap<String, String>>(&raw).unwrap_or_default();
        }
    }
    let response_headers: Option<String> = row.try_get("response_headers")?;
    if let Some(raw) = response_headers {
        if !raw.is_empty() && raw != "null" {
            record.response_headers =
                serde_json::from_str::<HashMap<String, String>>(&raw).unwrap_or_default();
        }
    }

    Ok(record)
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save(&self, record: &RequestRecord) -> PrismResult<()> {
        let id = if record.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            record.id.clone()
        };
        let created_at = if record.created_at == DateTime::UNIX_EPOCH {
            Utc::now()
        } else {
            record.created_at
        };

        let request_headers = serde_json::to_string(&record.request_headers)?;
        let response_headers = serde_json::to_string(&record.response_headers)?;

        sqlx::query(
            r#"
            INSERT INTO request_logs (
                id, created_at, upstream, target_url, method, path, query,
                request_headers, request_body, request_body_ref, request_body_size,
                status_code, response_headers, response_body, response_body_ref, response_body_size,
                streaming, latency_ms, error, truncated, tag
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at,
                upstream = excluded.upstream,
                target_url = excluded.target_url,
                method = excluded.method,
                path = excluded.path,
                query = excluded.query,
                request_headers = excluded.request_headers,
                request_body = excluded.request_body,
                request_body_ref = excluded.request_body_ref,
                request_body_size = excluded.request_body_size,
                status_code = excluded.status_code,
                response_headers = excluded.response_headers,
                response_body = excluded.response_body,
                response_body_ref = excluded.response_body_ref,
                response_body_size = excluded.response_body_size,
                streaming = excluded.streaming,
                latency_ms = excluded.latency_ms,
                error = excluded.error,
                truncated = excluded.truncated,
                tag = excluded.tag
            "#,
        )
        .bind(&id)
        .bind(created_at)
        .bind(&record.upstream)
        .bind(&record.target_url)
        .bind(&record.method)
        .bind(&record.path)
        .bind(&record.query)
        .bind(&request_headers)
        .bind(&record.request_body)
        .bind(&record.request_body_ref)
        .bind(record.request_body_size)
        .bind(record.status_code as i32)
        .bind(&response_headers)
        .bind(&record.response_body)
        .bind(&record.response_body_ref)
        .bind(record.response_body_size)
        .bind(record.streaming)
        .bind(record.latency_ms)
        .bind(&record.error)
        .bind(record.truncated)
        .bind(&record.tag)
        .execute(&self.pool)
        .await?;

        debug!("request record saved: {}", id);
        Ok(())
    }

    async fn get(&self, id: &str) -> PrismResult<Option<RequestRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, created_at, upstream, target_url, method, path, query,
                request_headers, request_body, request_body_ref, request_body_size,
                status_code, response_headers, response_body, response_body_ref, response_body_size,
                streaming, latency_ms, error, truncated, tag
            FROM request_logs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(scan_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &RecordFilter) -> PrismResult<(Vec<RequestRecord>, i64)> {
        // Total count under the same predicate, for pagination.
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) AS total FROM request_logs");
        push_filter(&mut count_qb, filter);
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let limit = if filter.limit <= 0 {
            50
        } else {
            filter.limit.min(1000)
        };
        let offset = filter.offset.max(0);

        let mut qb = QueryBuilder::new(
            r#"SELECT id, created_at, upstream, target_url, method, path, query,
                request_body_size, status_code, response_body_size,
                streaming, latency_ms, error, truncated, tag
            FROM request_logs"#,
        );
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(scan_summary(row)?);
        }

        Ok((records, total))
    }

    async fn delete_before(&self, before: DateTime<Utc>) -> PrismResult<i64> {
        let result = sqlx::query("DELETE FROM request_logs WHERE created_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as i64)
    }

    async fn stats(&self, since: Option<DateTime<Utc>>) -> PrismResult<RecordStats> {
        let mut stats = RecordStats::default();

        let mut qb = QueryBuilder::new(
            r#"SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status_code >= 200 AND status_code < 400 THEN 1 ELSE 0 END), 0) AS success,
                COALESCE(SUM(CASE WHEN (error IS NOT NULL AND error != '') OR status_code >= 400 THEN 1 ELSE 0 END), 0) AS errors,
                COALESCE(SUM(CASE WHEN streaming = 1 THEN 1 ELSE 0 END), 0) AS streaming,
                COALESCE(AVG(latency_ms), 0) AS avg_latency
            FROM request_logs"#,
        );
        if let Some(since) = since {
            qb.push(" WHERE created_at >= ").push_bind(since);
        }
        let row = qb.build().fetch_one(&self.pool).await?;
        stats.total_requests = row.try_get("total")?;
        stats.success_count = row.try_get("success")?;
        stats.error_count = row.try_get("errors")?;
        stats.streaming_count = row.try_get("streaming")?;
        stats.avg_latency_ms = row.try_get("avg_latency")?;

        let mut qb = QueryBuilder::new("SELECT upstream, COUNT(*) AS count FROM request_logs");
        if let Some(since) = since {
            qb.push(" WHERE created_at >= ").push_bind(since);
        }
        qb.push(" GROUP BY upstream");
        for row in qb.build().fetch_all(&self.pool).await? {
            let upstream: String = row.try_get("upstream")?;
            let count: i64 = row.try_get("count")?;
            stats.by_upstream.insert(upstream, count);
        }

        let mut qb = QueryBuilder::new("SELECT status_code, COUNT(*) AS count FROM request_logs");
        if let Some(since) = since {
            qb.push(" WHERE created_at >= ").push_bind(since);
        }
        qb.push(" GROUP BY status_code");
        for row in qb.build().fetch_all(&self.pool).await? {
            let status: i32 = row.try_get("status_code")?;
            let count: i64 = row.try_get("count")?;
            stats.by_status_code.insert(status as u16, count);
        }

        Ok(stats)
    }

    async fn close(&self) -> PrismResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
