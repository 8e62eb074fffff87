//! Repository for the `jobs` table.
//!
//! Every write is awaited to completion before returning. Reads that return
//! many rows skip records that fail to decode and log them instead.

use rollout_core::job::{Job, JobStatus, TERMINAL_STATUSES};
use rollout_core::types::{JobId, Timestamp};
use sqlx::SqlitePool;

use crate::models::job::{encode_timestamp, JobFilter, JobRecord, JobRow};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, status, owner, created_at, updated_at, \
    request, message, result, logs";

/// Default page size for job listing.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Maximum page size for job listing.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Provides persistence operations for deployment jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job. Fails if the id already exists.
    pub async fn insert(pool: &SqlitePool, job: &Job) -> Result<(), sqlx::Error> {
        let record = encode(job)?;
        let query = format!(
            "INSERT INTO jobs ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        );
        sqlx::query(&query)
            .bind(&record.id)
            .bind(record.status)
            .bind(&record.owner)
            .bind(&record.created_at)
            .bind(&record.updated_at)
            .bind(&record.request)
            .bind(&record.message)
            .bind(&record.result)
            .bind(&record.logs)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Overwrite every mutable column of an existing job.
    ///
    /// Returns `false` if no row with the job's id exists.
    pub async fn update(pool: &SqlitePool, job: &Job) -> Result<bool, sqlx::Error> {
        let record = encode(job)?;
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = ?2, updated_at = ?3, message = ?4, result = ?5, logs = ?6 \
             WHERE id = ?1",
        )
        .bind(&record.id)
        .bind(record.status)
        .bind(&record.updated_at)
        .bind(&record.message)
        .bind(&record.result)
        .bind(&record.logs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append one formatted log entry without rewriting the rest of the row.
    ///
    /// Returns `false` if no row with `id` exists.
    pub async fn append_log(
        pool: &SqlitePool,
        id: JobId,
        entry: &str,
        updated_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET logs = json_insert(COALESCE(logs, '[]'), '$[#]', ?2), updated_at = ?3 \
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(entry)
        .bind(encode_timestamp(updated_at))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a job by its id.
    ///
    /// A row that exists but cannot be decoded is reported as
    /// [`sqlx::Error::Decode`].
    pub async fn find_by_id(pool: &SqlitePool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;
        row.map(|r| r.into_job().map_err(|e| sqlx::Error::Decode(Box::new(e))))
            .transpose()
    }

    /// One page of jobs matching `filter`, most recent first, plus the total
    /// number of matching rows.
    ///
    /// `page` is 1-based. `page_size` is clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn list(
        pool: &SqlitePool,
        filter: &JobFilter,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Job>, i64), sqlx::Error> {
        let limit = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page.max(1) - 1) * limit;

        let mut conditions: Vec<&str> = Vec::new();
        if filter.status.is_some() {
            conditions.push("status = ?");
        }
        if filter.owner.is_some() {
            conditions.push("owner = ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_query = format!("SELECT COUNT(*) FROM jobs {where_clause}");
        let mut count = sqlx::query_scalar::<_, i64>(&count_query);
        if let Some(status) = filter.status {
            count = count.bind(status.as_str());
        }
        if let Some(owner) = &filter.owner {
            count = count.bind(owner);
        }
        let total = count.fetch_one(pool).await?;

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ? OFFSET ?"
        );
        let mut q = sqlx::query_as::<_, JobRow>(&query);
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(owner) = &filter.owner {
            q = q.bind(owner);
        }
        let rows = q.bind(limit).bind(offset).fetch_all(pool).await?;

        Ok((decode_rows(rows), total))
    }

    /// Jobs created at or after `since`, most recent first, at most `limit`.
    pub async fn list_recent(
        pool: &SqlitePool,
        since: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE created_at >= ?1 \
             ORDER BY created_at DESC \
             LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(encode_timestamp(since))
            .bind(limit.max(0))
            .fetch_all(pool)
            .await?;
        Ok(decode_rows(rows))
    }

    /// All jobs in any of `statuses`, oldest first.
    pub async fn list_by_status(
        pool: &SqlitePool,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, sqlx::Error> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status IN ({placeholders}) \
             ORDER BY created_at ASC"
        );
        let mut q = sqlx::query_as::<_, JobRow>(&query);
        for status in statuses {
            q = q.bind(status.as_str());
        }
        let rows = q.fetch_all(pool).await?;
        Ok(decode_rows(rows))
    }

    /// Delete jobs whose `updated_at` is before `cutoff`.
    ///
    /// With `terminal_only`, queued and running jobs are never deleted.
    /// Returns the ids of the removed rows.
    pub async fn delete_older_than(
        pool: &SqlitePool,
        cutoff: Timestamp,
        terminal_only: bool,
    ) -> Result<Vec<JobId>, sqlx::Error> {
        let ids: Vec<String> = if terminal_only {
            sqlx::query_scalar(
                "DELETE FROM jobs \
                 WHERE updated_at < ?1 AND status IN (?2, ?3, ?4) \
                 RETURNING id",
            )
            .bind(encode_timestamp(cutoff))
            .bind(TERMINAL_STATUSES[0].as_str())
            .bind(TERMINAL_STATUSES[1].as_str())
            .bind(TERMINAL_STATUSES[2].as_str())
            .fetch_all(pool)
            .await?
        } else {
            sqlx::query_scalar("DELETE FROM jobs WHERE updated_at < ?1 RETURNING id")
                .bind(encode_timestamp(cutoff))
                .fetch_all(pool)
                .await?
        };

        Ok(ids
            .into_iter()
            .filter_map(|raw| match raw.parse::<JobId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(id = %raw, error = %e, "Deleted job row had a malformed id");
                    None
                }
            })
            .collect())
    }

    /// Number of jobs per status among those created at or after `since`,
    /// limited to `owner` when given.
    ///
    /// Statuses the store does not recognise are skipped.
    pub async fn status_counts(
        pool: &SqlitePool,
        since: Timestamp,
        owner: Option<&str>,
    ) -> Result<Vec<(JobStatus, i64)>, sqlx::Error> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM jobs \
             WHERE created_at >= ?1 AND (?2 IS NULL OR owner = ?2) \
             GROUP BY status",
        )
        .bind(encode_timestamp(since))
        .bind(owner)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(status, count)| match status.parse::<JobStatus>() {
                Ok(status) => Some((status, count)),
                Err(e) => {
                    tracing::warn!(status = %status, error = %e, "Unknown job status in store");
                    None
                }
            })
            .collect())
    }
}

fn encode(job: &Job) -> Result<JobRecord, sqlx::Error> {
    JobRecord::from_job(job).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Decode rows, skipping (and logging) any that are corrupt.
fn decode_rows(rows: Vec<JobRow>) -> Vec<Job> {
    rows.into_iter()
        .filter_map(|row| match row.into_job() {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!(job_id = %e.id, field = e.field, error = %e, "Skipping corrupt job record");
                None
            }
        })
        .collect()
}
