//! Postgres-backed job store implementation.
//!
//! ## Atomicity
//!
//! - `create_job` inserts the job row and upserts the session row in one
//!   transaction; a job never exists without its session update.
//! - Status transitions are single conditional `UPDATE .. WHERE status = ..
//!   RETURNING` statements: under concurrent callers exactly one row update
//!   wins, the loser re-reads the row to report `InvalidTransition` (or
//!   `JobNotFound` if the job was purged in between).
//! - `complete_job` writes result rows inside the transition's transaction,
//!   so either the terminal status and all rows land, or none do.
//! - `get_job` and `aggregate` run in REPEATABLE READ transactions: one
//!   snapshot across the job row and its satellites, never blocking writers.
//! - `sweep` issues independent DELETE statements; result rows go with their
//!   job via `ON DELETE CASCADE`.
//!
//! ## Error mapping
//!
//! All sqlx failures funnel through `map_sqlx_error` into
//! `StoreError::Unavailable` with the operation name; lifecycle errors
//! (`JobNotFound`, `InvalidTransition`) are derived from row counts, not from
//! database error codes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use scantrack_core::{
    Completion, Job, JobId, JobStatus, NewJob, ProcessingParams, ResultRow, Session, SessionId,
    StoreError, StoreResult,
};

use crate::stats::{self, StatsSnapshot};
use crate::store::{JobStore, JobWithResults};
use crate::sweeper::{RetentionPolicy, SweepOutcome};

const JOB_COLUMNS: &str = "id, job_type, status, processing_params, processing_time_ms, \
     error_code, error_message, session_id, client_ip, user_agent, \
     created_at, updated_at, started_at, completed_at";

/// Production store on a shared `PgPool`.
///
/// Thread-safe: the pool is `Send + Sync`, every method is a self-contained
/// statement or transaction.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::unavailable(format!("migrate: {e}")))
    }

    /// Re-read a job's status after a conditional update matched no row, to
    /// tell "gone" apart from "wrong state".
    async fn transition_conflict(&self, id: JobId, to: JobStatus) -> StoreError {
        let row = sqlx::query("SELECT status FROM processing_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await;
        match row {
            Ok(Some(row)) => match row
                .try_get::<String, _>("status")
                .map_err(|e| StoreError::unavailable(format!("decode status: {e}")))
                .and_then(|s| s.parse::<JobStatus>())
            {
                Ok(from) => StoreError::invalid_transition(from, to),
                Err(e) => e,
            },
            Ok(None) => StoreError::JobNotFound(id),
            Err(e) => map_sqlx_error("reread_status", e),
        }
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    #[instrument(skip(self, new), fields(job_type = %new.job_type, session_id = %new.session_id), err)]
    async fn create_job(&self, new: NewJob) -> StoreResult<Job> {
        let now = Utc::now();
        let job = Job::create(new, now);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO processing_jobs (
                id,
                job_type,
                status,
                processing_params,
                session_id,
                client_ip,
                user_agent,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.params.to_value())
        .bind(job.session_id.as_str())
        .bind(&job.client_ip)
        .bind(&job.user_agent)
        .bind(job.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        // Derived session counters, maintained in the same transaction as the
        // job insert. The CASE handles the day rollover; the conflict target
        // makes two concurrent first-jobs for a session serialize instead of
        // double-inserting.
        sqlx::query(
            r#"
            INSERT INTO user_sessions (
                session_id,
                client_ip,
                user_agent,
                total_jobs,
                jobs_today,
                first_seen,
                last_seen,
                last_job_date
            )
            VALUES ($1, $2, $3, 1, 1, $4, $4, $5)
            ON CONFLICT (session_id)
            DO UPDATE SET
                total_jobs = user_sessions.total_jobs + 1,
                jobs_today = CASE
                    WHEN user_sessions.last_job_date = EXCLUDED.last_job_date
                    THEN user_sessions.jobs_today + 1
                    ELSE 1
                END,
                last_job_date = EXCLUDED.last_job_date,
                last_seen = EXCLUDED.last_seen,
                client_ip = COALESCE(EXCLUDED.client_ip, user_sessions.client_ip),
                user_agent = CASE
                    WHEN EXCLUDED.user_agent IS NOT NULL AND EXCLUDED.user_agent <> ''
                    THEN EXCLUDED.user_agent
                    ELSE user_sessions.user_agent
                END
            "#,
        )
        .bind(job.session_id.as_str())
        .bind(&job.client_ip)
        .bind(&job.user_agent)
        .bind(now)
        .bind(now.date_naive())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_session", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn mark_processing(&self, id: JobId) -> StoreResult<Job> {
        let now = Utc::now();
        let sql = format!(
            "UPDATE processing_jobs \
             SET status = 'processing', started_at = $2, updated_at = $2 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_processing", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.transition_conflict(id, JobStatus::Processing).await),
        }
    }

    #[instrument(skip(self, completion), fields(job_id = %id), err)]
    async fn complete_job(&self, id: JobId, completion: Completion) -> StoreResult<Job> {
        completion.validate()?;
        let now = Utc::now();
        let status = completion.terminal_status().as_status();
        let (error_code, error_message) = match &completion {
            Completion::Failure {
                error_code,
                error_message,
                ..
            } => (Some(error_code.as_str()), Some(error_message.as_str())),
            Completion::Success { .. } => (None, None),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!(
            "UPDATE processing_jobs \
             SET status = $2, processing_time_ms = $3, error_code = $4, \
                 error_message = $5, completed_at = $6, updated_at = $6 \
             WHERE id = $1 AND status = 'processing' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(completion.processing_time_ms())
            .bind(error_code)
            .bind(error_message)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("complete_job", e))?;

        let Some(row) = row else {
            // Rollback happens on drop; report the precise conflict.
            drop(tx);
            return Err(self.transition_conflict(id, status).await);
        };
        let job = job_from_row(&row)?;

        if let Completion::Success { results, .. } = &completion {
            for result in results {
                insert_result_row(&mut tx, id, result).await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn cancel_job(&self, id: JobId) -> StoreResult<Job> {
        let now = Utc::now();
        let sql = format!(
            "UPDATE processing_jobs \
             SET status = 'cancelled', updated_at = $2 \
             WHERE id = $1 AND status IN ('pending', 'processing') \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("cancel_job", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.transition_conflict(id, JobStatus::Cancelled).await),
        }
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_job(&self, id: JobId) -> StoreResult<JobWithResults> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // One snapshot for the job row and all three result tables, so a
        // concurrent completion committing mid-read cannot produce a
        // non-terminal status paired with result rows. READ COMMITTED takes
        // a fresh snapshot per statement, hence the explicit level.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let sql = format!("SELECT {JOB_COLUMNS} FROM processing_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?
            .ok_or(StoreError::JobNotFound(id))?;
        let job = job_from_row(&row)?;

        let mut results = Vec::new();

        let rows = sqlx::query(
            "SELECT full_text, language, confidence_avg FROM ocr_results \
             WHERE job_id = $1 ORDER BY id",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("get_ocr_results", e))?;
        for row in rows {
            results.push(ResultRow::Ocr(scantrack_core::OcrResult {
                full_text: try_column(&row, "full_text")?,
                language: try_column(&row, "language")?,
                confidence_avg: try_column(&row, "confidence_avg")?,
            }));
        }

        let rows = sqlx::query(
            "SELECT barcode_data, barcode_type, confidence FROM barcode_results \
             WHERE job_id = $1 ORDER BY id",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("get_barcode_results", e))?;
        for row in rows {
            results.push(ResultRow::Barcode(scantrack_core::BarcodeResult {
                barcode_data: try_column(&row, "barcode_data")?,
                barcode_type: try_column(&row, "barcode_type")?,
                confidence: try_column(&row, "confidence")?,
            }));
        }

        let rows = sqlx::query(
            "SELECT data, content_type FROM qrcode_results \
             WHERE job_id = $1 ORDER BY id",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("get_qrcode_results", e))?;
        for row in rows {
            results.push(ResultRow::Qrcode(scantrack_core::QrcodeResult {
                data: try_column(&row, "data")?,
                content_type: try_column(&row, "content_type")?,
            }));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(JobWithResults { job, results })
    }

    #[instrument(skip(self), fields(status = %status), err)]
    async fn list_jobs_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs \
             WHERE status = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(limit.max(0))
            .bind(offset.max(0))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_jobs_by_status", e))?;
        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn list_jobs_by_session(
        &self,
        session_id: &SessionId,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs \
             WHERE session_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(session_id.as_str())
            .bind(limit.max(0))
            .bind(offset.max(0))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_jobs_by_session", e))?;
        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn get_session(&self, session_id: &SessionId) -> StoreResult<Session> {
        let row = sqlx::query(
            "SELECT session_id, client_ip, user_agent, total_jobs, jobs_today, \
                    first_seen, last_seen, last_job_date \
             FROM user_sessions WHERE session_id = $1",
        )
        .bind(session_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_session", e))?
        .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        session_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn aggregate(&self, period_days: u32) -> StoreResult<StatsSnapshot> {
        let now = Utc::now();
        let cutoff = now - Duration::days(i64::from(period_days));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // One snapshot for all reads below; never blocks writers.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let summary = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_jobs,
                COUNT(*) FILTER (WHERE status = 'completed') AS successful_jobs,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed_jobs,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending_jobs,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing_jobs,
                AVG(processing_time_ms::double precision) AS avg_processing_time_ms,
                COUNT(*) FILTER (WHERE job_type = 'ocr') AS ocr_jobs,
                COUNT(*) FILTER (WHERE job_type = 'barcode') AS barcode_jobs,
                COUNT(*) FILTER (WHERE job_type = 'qrcode') AS qrcode_jobs,
                COUNT(DISTINCT session_id) AS unique_sessions
            FROM processing_jobs
            WHERE created_at >= $1
            "#,
        )
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("aggregate_summary", e))?;

        let language_row = sqlx::query(
            r#"
            SELECT processing_params->>'language' AS language, COUNT(*) AS n
            FROM processing_jobs
            WHERE created_at >= $1
              AND job_type = 'ocr'
              AND processing_params->>'language' IS NOT NULL
            GROUP BY 1
            ORDER BY n DESC, language ASC
            LIMIT 1
            "#,
        )
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("aggregate_top_language", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let total_jobs: i64 = try_column(&summary, "total_jobs")?;
        let successful_jobs: i64 = try_column(&summary, "successful_jobs")?;
        let avg_raw: Option<f64> = try_column(&summary, "avg_processing_time_ms")?;
        let top_language = match language_row {
            Some(row) => try_column::<Option<String>>(&row, "language")?
                .unwrap_or_else(|| stats::UNKNOWN_LANGUAGE.to_owned()),
            None => stats::UNKNOWN_LANGUAGE.to_owned(),
        };

        Ok(StatsSnapshot {
            period_days,
            generated_at: now,
            total_jobs,
            successful_jobs,
            failed_jobs: try_column(&summary, "failed_jobs")?,
            pending_jobs: try_column(&summary, "pending_jobs")?,
            processing_jobs: try_column(&summary, "processing_jobs")?,
            success_rate: stats::success_rate(successful_jobs, total_jobs),
            avg_processing_time_ms: avg_raw.map(stats::round2),
            ocr_jobs: try_column(&summary, "ocr_jobs")?,
            barcode_jobs: try_column(&summary, "barcode_jobs")?,
            qrcode_jobs: try_column(&summary, "qrcode_jobs")?,
            unique_sessions: try_column(&summary, "unique_sessions")?,
            top_language,
        })
    }

    #[instrument(skip(self), fields(
        job_retention_days = policy.job_retention_days,
        session_inactivity_days = policy.session_inactivity_days,
    ), err)]
    async fn sweep(&self, policy: &RetentionPolicy) -> StoreResult<SweepOutcome> {
        let now = Utc::now();
        let job_cutoff = now - Duration::days(i64::from(policy.job_retention_days));
        let session_cutoff = now - Duration::days(i64::from(policy.session_inactivity_days));

        // Two independent atomic statements: a failure in one leaves no
        // partial damage in the other, and reruns are no-ops.
        let jobs = sqlx::query("DELETE FROM processing_jobs WHERE created_at < $1")
            .bind(job_cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("sweep_jobs", e))?
            .rows_affected();

        let sessions = sqlx::query("DELETE FROM user_sessions WHERE last_seen < $1")
            .bind(session_cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("sweep_sessions", e))?
            .rows_affected();

        Ok(SweepOutcome {
            jobs_deleted: jobs,
            sessions_deleted: sessions,
        })
    }
}

fn try_column<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::unavailable(format!("decode column {name}: {e}")))
}

fn job_from_row(row: &PgRow) -> StoreResult<Job> {
    let job_type: String = try_column(row, "job_type")?;
    let status: String = try_column(row, "status")?;
    let params: serde_json::Value = try_column(row, "processing_params")?;
    let session_id: String = try_column(row, "session_id")?;

    Ok(Job {
        id: JobId::from_uuid(try_column::<Uuid>(row, "id")?),
        job_type: job_type.parse()?,
        status: status.parse()?,
        params: ProcessingParams::from_value(params)?,
        processing_time_ms: try_column(row, "processing_time_ms")?,
        error_code: try_column(row, "error_code")?,
        error_message: try_column(row, "error_message")?,
        session_id: SessionId::new(session_id)?,
        client_ip: try_column(row, "client_ip")?,
        user_agent: try_column(row, "user_agent")?,
        created_at: try_column::<DateTime<Utc>>(row, "created_at")?,
        updated_at: try_column::<DateTime<Utc>>(row, "updated_at")?,
        started_at: try_column(row, "started_at")?,
        completed_at: try_column(row, "completed_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    let session_id: String = try_column(row, "session_id")?;
    Ok(Session {
        session_id: SessionId::new(session_id)?,
        client_ip: try_column(row, "client_ip")?,
        user_agent: try_column(row, "user_agent")?,
        total_jobs: try_column(row, "total_jobs")?,
        jobs_today: try_column(row, "jobs_today")?,
        first_seen: try_column::<DateTime<Utc>>(row, "first_seen")?,
        last_seen: try_column::<DateTime<Utc>>(row, "last_seen")?,
        last_job_date: try_column(row, "last_job_date")?,
    })
}

async fn insert_result_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job_id: JobId,
    result: &ResultRow,
) -> StoreResult<()> {
    match result {
        ResultRow::Ocr(ocr) => {
            sqlx::query(
                "INSERT INTO ocr_results (job_id, full_text, language, confidence_avg) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(job_id.as_uuid())
            .bind(&ocr.full_text)
            .bind(&ocr.language)
            .bind(ocr.confidence_avg)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_ocr_result", e))?;
        }
        ResultRow::Barcode(barcode) => {
            sqlx::query(
                "INSERT INTO barcode_results (job_id, barcode_data, barcode_type, confidence) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(job_id.as_uuid())
            .bind(&barcode.barcode_data)
            .bind(&barcode.barcode_type)
            .bind(barcode.confidence)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_barcode_result", e))?;
        }
        ResultRow::Qrcode(qr) => {
            sqlx::query(
                "INSERT INTO qrcode_results (job_id, data, content_type) \
                 VALUES ($1, $2, $3)",
            )
            .bind(job_id.as_uuid())
            .bind(&qr.data)
            .bind(&qr.content_type)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_qrcode_result", e))?;
        }
    }
    Ok(())
}

/// Map SQLx errors to `StoreError::Unavailable` with operation context.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::unavailable(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("unknown")
        )),
        other => StoreError::unavailable(format!("{operation}: {other}")),
    }
}
