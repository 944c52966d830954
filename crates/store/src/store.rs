//! Job store abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use scantrack_core::{
    Completion, Job, JobId, JobStatus, NewJob, ResultRow, Session, SessionId, StoreResult,
};

use crate::stats::StatsSnapshot;
use crate::sweeper::{RetentionPolicy, SweepOutcome};

/// A job together with its result rows (empty until completion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobWithResults {
    pub job: Job,
    pub results: Vec<ResultRow>,
}

/// Store surface for the job lifecycle and analytics core.
///
/// Writes come from concurrent request-handling workers; `sweep` from an
/// out-of-band scheduler; `aggregate` from the analytics endpoint. Every
/// implementation must make the §transition checks atomic against concurrent
/// callers and must fold the session upsert into the job-insert transaction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a Pending job and upsert its session atomically.
    async fn create_job(&self, new: NewJob) -> StoreResult<Job>;

    /// Pending -> Processing.
    async fn mark_processing(&self, id: JobId) -> StoreResult<Job>;

    /// Processing -> Completed/Failed; result rows (success only) are written
    /// atomically with the transition.
    async fn complete_job(&self, id: JobId, completion: Completion) -> StoreResult<Job>;

    /// Pending/Processing -> Cancelled. Writes no result rows.
    async fn cancel_job(&self, id: JobId) -> StoreResult<Job>;

    /// Fetch a job and its result rows.
    async fn get_job(&self, id: JobId) -> StoreResult<JobWithResults>;

    /// Jobs in a given status, newest first.
    async fn list_jobs_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Job>>;

    /// Jobs belonging to a session, newest first.
    async fn list_jobs_by_session(
        &self,
        session_id: &SessionId,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Job>>;

    /// Read back the tracked session counters.
    async fn get_session(&self, session_id: &SessionId) -> StoreResult<Session>;

    /// Point-in-time analytics over the trailing `period_days` window,
    /// computed in a single consistent read.
    async fn aggregate(&self, period_days: u32) -> StoreResult<StatsSnapshot>;

    /// Purge expired jobs (cascading results) and stale sessions. Idempotent.
    async fn sweep(&self, policy: &RetentionPolicy) -> StoreResult<SweepOutcome>;
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn create_job(&self, new: NewJob) -> StoreResult<Job> {
        (**self).create_job(new).await
    }

    async fn mark_processing(&self, id: JobId) -> StoreResult<Job> {
        (**self).mark_processing(id).await
    }

    async fn complete_job(&self, id: JobId, completion: Completion) -> StoreResult<Job> {
        (**self).complete_job(id, completion).await
    }

    async fn cancel_job(&self, id: JobId) -> StoreResult<Job> {
        (**self).cancel_job(id).await
    }

    async fn get_job(&self, id: JobId) -> StoreResult<JobWithResults> {
        (**self).get_job(id).await
    }

    async fn list_jobs_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Job>> {
        (**self).list_jobs_by_status(status, limit, offset).await
    }

    async fn list_jobs_by_session(
        &self,
        session_id: &SessionId,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Job>> {
        (**self).list_jobs_by_session(session_id, limit, offset).await
    }

    async fn get_session(&self, session_id: &SessionId) -> StoreResult<Session> {
        (**self).get_session(session_id).await
    }

    async fn aggregate(&self, period_days: u32) -> StoreResult<StatsSnapshot> {
        (**self).aggregate(period_days).await
    }

    async fn sweep(&self, policy: &RetentionPolicy) -> StoreResult<SweepOutcome> {
        (**self).sweep(policy).await
    }
}
