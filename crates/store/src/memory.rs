//! In-memory job store for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use scantrack_core::{
    Completion, Job, JobId, JobStatus, JobType, NewJob, ResultRow, Session, SessionId, StoreError,
    StoreResult,
};

use crate::stats::{self, StatsSnapshot};
use crate::store::{JobStore, JobWithResults};
use crate::sweeper::{RetentionPolicy, SweepOutcome};

/// Lock-based store with the same semantics as the Postgres backend.
///
/// Every mutation runs under the write lock, which makes each transition an
/// atomic read-modify-write and the session upsert part of the same critical
/// section as the job insert. `aggregate` holds the read lock for the whole
/// computation, giving the single-consistent-read guarantee.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    results: HashMap<JobId, Vec<ResultRow>>,
    sessions: HashMap<SessionId, Session>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    #[cfg(test)]
    pub(crate) fn backdate_job(&self, id: JobId, days: i64) {
        let mut inner = self.inner.write().unwrap();
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.created_at -= Duration::days(days);
            job.updated_at = job.created_at;
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_session(&self, session_id: &SessionId, days: i64) {
        let mut inner = self.inner.write().unwrap();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.last_seen -= Duration::days(days);
        }
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create_job(&self, new: NewJob) -> StoreResult<Job> {
        let now = Utc::now();
        let job = Job::create(new, now);

        let mut inner = self.inner.write().unwrap();
        match inner.sessions.get_mut(&job.session_id) {
            Some(session) => {
                session.record_job(now, job.client_ip.as_deref(), job.user_agent.as_deref());
            }
            None => {
                let session = Session::open(
                    job.session_id.clone(),
                    now,
                    job.client_ip.as_deref(),
                    job.user_agent.as_deref(),
                );
                inner.sessions.insert(job.session_id.clone(), session);
            }
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn mark_processing(&self, id: JobId) -> StoreResult<Job> {
        let mut inner = self.inner.write().unwrap();
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.begin_processing(Utc::now())?;
        Ok(job.clone())
    }

    async fn complete_job(&self, id: JobId, completion: Completion) -> StoreResult<Job> {
        completion.validate()?;
        let mut inner = self.inner.write().unwrap();
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.finish(&completion, Utc::now())?;
        let job = job.clone();
        if let Completion::Success { results, .. } = completion {
            if !results.is_empty() {
                inner.results.insert(id, results);
            }
        }
        Ok(job)
    }

    async fn cancel_job(&self, id: JobId) -> StoreResult<Job> {
        let mut inner = self.inner.write().unwrap();
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.cancel(Utc::now())?;
        Ok(job.clone())
    }

    async fn get_job(&self, id: JobId) -> StoreResult<JobWithResults> {
        let inner = self.inner.read().unwrap();
        let job = inner.jobs.get(&id).ok_or(StoreError::JobNotFound(id))?;
        Ok(JobWithResults {
            job: job.clone(),
            results: inner.results.get(&id).cloned().unwrap_or_default(),
        })
    }

    async fn list_jobs_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Job>> {
        let inner = self.inner.read().unwrap();
        Ok(page(
            inner.jobs.values().filter(|j| j.status == status),
            limit,
            offset,
        ))
    }

    async fn list_jobs_by_session(
        &self,
        session_id: &SessionId,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Job>> {
        let inner = self.inner.read().unwrap();
        Ok(page(
            inner.jobs.values().filter(|j| &j.session_id == session_id),
            limit,
            offset,
        ))
    }

    async fn get_session(&self, session_id: &SessionId) -> StoreResult<Session> {
        let inner = self.inner.read().unwrap();
        inner
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
    }

    async fn aggregate(&self, period_days: u32) -> StoreResult<StatsSnapshot> {
        let now = Utc::now();
        let cutoff = now - Duration::days(i64::from(period_days));

        let inner = self.inner.read().unwrap();

        let mut snapshot = StatsSnapshot {
            period_days,
            generated_at: now,
            total_jobs: 0,
            successful_jobs: 0,
            failed_jobs: 0,
            pending_jobs: 0,
            processing_jobs: 0,
            success_rate: 0.0,
            avg_processing_time_ms: None,
            ocr_jobs: 0,
            barcode_jobs: 0,
            qrcode_jobs: 0,
            unique_sessions: 0,
            top_language: stats::UNKNOWN_LANGUAGE.to_owned(),
        };

        let mut time_sum: i64 = 0;
        let mut time_count: i64 = 0;
        let mut sessions: HashSet<&SessionId> = HashSet::new();
        let mut languages: HashMap<&str, u64> = HashMap::new();

        for job in inner.jobs.values().filter(|j| j.created_at >= cutoff) {
            snapshot.total_jobs += 1;
            match job.status {
                JobStatus::Completed => snapshot.successful_jobs += 1,
                JobStatus::Failed => snapshot.failed_jobs += 1,
                JobStatus::Pending => snapshot.pending_jobs += 1,
                JobStatus::Processing => snapshot.processing_jobs += 1,
                JobStatus::Cancelled => {}
            }
            match job.job_type {
                JobType::Ocr => snapshot.ocr_jobs += 1,
                JobType::Barcode => snapshot.barcode_jobs += 1,
                JobType::Qrcode => snapshot.qrcode_jobs += 1,
                JobType::All => {}
            }
            if let Some(ms) = job.processing_time_ms {
                time_sum += ms;
                time_count += 1;
            }
            if job.job_type == JobType::Ocr {
                if let Some(language) = job.params.language() {
                    *languages.entry(language).or_insert(0) += 1;
                }
            }
            sessions.insert(&job.session_id);
        }

        snapshot.unique_sessions = sessions.len() as i64;
        snapshot.success_rate = stats::success_rate(snapshot.successful_jobs, snapshot.total_jobs);
        if time_count > 0 {
            snapshot.avg_processing_time_ms =
                Some(stats::round2(time_sum as f64 / time_count as f64));
        }
        snapshot.top_language = stats::top_language(languages);

        Ok(snapshot)
    }

    async fn sweep(&self, policy: &RetentionPolicy) -> StoreResult<SweepOutcome> {
        let now = Utc::now();
        let job_cutoff = now - Duration::days(i64::from(policy.job_retention_days));
        let session_cutoff = now - Duration::days(i64::from(policy.session_inactivity_days));

        let mut inner = self.inner.write().unwrap();

        let expired: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.created_at < job_cutoff)
            .map(|j| j.id)
            .collect();
        for id in &expired {
            inner.jobs.remove(id);
            inner.results.remove(id);
        }

        let stale: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|s| s.last_seen < session_cutoff)
            .map(|s| s.session_id.clone())
            .collect();
        for sid in &stale {
            inner.sessions.remove(sid);
        }

        Ok(SweepOutcome {
            jobs_deleted: expired.len() as u64,
            sessions_deleted: stale.len() as u64,
        })
    }
}

fn page<'a, I>(jobs: I, limit: i64, offset: i64) -> Vec<Job>
where
    I: Iterator<Item = &'a Job>,
{
    let mut result: Vec<Job> = jobs.cloned().collect();
    // Id as tiebreak: jobs created in the same instant still list in a
    // stable order (UUIDv7 ids are time-ordered).
    result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    result
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}
