//! The processing-job lifecycle: types, status state machine, transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::id::{JobId, SessionId};
use crate::result::ResultRow;

/// Kind of processing requested for an uploaded image.
///
/// Closed set: the decoders behind each variant live outside this crate, but
/// the store routes and counts by this tag. `All` runs every decoder over the
/// same image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Ocr,
    Barcode,
    Qrcode,
    All,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Ocr => "ocr",
            JobType::Barcode => "barcode",
            JobType::Qrcode => "qrcode",
            JobType::All => "all",
        }
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ocr" => Ok(JobType::Ocr),
            "barcode" => Ok(JobType::Barcode),
            "qrcode" => Ok(JobType::Qrcode),
            "all" => Ok(JobType::All),
            other => Err(StoreError::validation(format!("unknown job_type: {other}"))),
        }
    }
}

/// Job execution status.
///
/// Legal paths: `Pending -> Processing -> {Completed | Failed | Cancelled}`
/// and the shortcut `Pending -> Cancelled`. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Transition legality table for the lifecycle state machine.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(StoreError::validation(format!("unknown status: {other}"))),
        }
    }
}

/// Terminal outcome reported by the worker that ran the decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Completed,
    Failed,
}

impl TerminalStatus {
    pub fn as_status(self) -> JobStatus {
        match self {
            TerminalStatus::Completed => JobStatus::Completed,
            TerminalStatus::Failed => JobStatus::Failed,
        }
    }
}

/// Requested processing parameters, e.g. `{"language": "en"}`.
///
/// Stored opaquely except for key-based lookups. The store only interprets
/// `language` (analytics); everything else passes through to the decoders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingParams(serde_json::Map<String, serde_json::Value>);

impl ProcessingParams {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Accept a JSON value, requiring it to be an object.
    pub fn from_value(value: serde_json::Value) -> StoreResult<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            serde_json::Value::Null => Ok(Self::default()),
            other => Err(StoreError::validation(format!(
                "processing_params must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// The `language` key, when present as a string.
    pub fn language(&self) -> Option<&str> {
        self.0.get("language").and_then(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }
}

fn json_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Input for job creation, supplied by the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: JobType,
    pub params: ProcessingParams,
    pub session_id: SessionId,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl NewJob {
    pub fn new(job_type: JobType, params: ProcessingParams, session_id: SessionId) -> Self {
        Self {
            job_type,
            params,
            session_id,
            client_ip: None,
            user_agent: None,
        }
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }
}

/// Terminal report from the worker: either decoded results or a typed error.
///
/// Result rows can only accompany a success, so "no rows on failure" holds at
/// the type level rather than by runtime checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Completion {
    Success {
        processing_time_ms: i64,
        results: Vec<ResultRow>,
    },
    Failure {
        processing_time_ms: i64,
        error_code: String,
        error_message: String,
    },
}

impl Completion {
    pub fn terminal_status(&self) -> TerminalStatus {
        match self {
            Completion::Success { .. } => TerminalStatus::Completed,
            Completion::Failure { .. } => TerminalStatus::Failed,
        }
    }

    pub fn processing_time_ms(&self) -> i64 {
        match self {
            Completion::Success {
                processing_time_ms, ..
            }
            | Completion::Failure {
                processing_time_ms, ..
            } => *processing_time_ms,
        }
    }

    /// Must hold before any write so a rejected completion leaves the job
    /// Processing and retryable.
    pub fn validate(&self) -> StoreResult<()> {
        if self.processing_time_ms() < 0 {
            return Err(StoreError::validation(format!(
                "processing_time_ms must be >= 0, got {}",
                self.processing_time_ms()
            )));
        }
        Ok(())
    }
}

/// One unit of requested processing with its full lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub params: ProcessingParams,
    /// Null while Pending/Processing; set exactly once at the terminal
    /// transition.
    pub processing_time_ms: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub session_id: SessionId,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Materialize a new Pending job from API input.
    pub fn create(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            job_type: new.job_type,
            status: JobStatus::Pending,
            params: new.params,
            processing_time_ms: None,
            error_code: None,
            error_message: None,
            session_id: new.session_id,
            client_ip: new.client_ip,
            user_agent: new.user_agent,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    fn transition(&mut self, to: JobStatus, now: DateTime<Utc>) -> StoreResult<()> {
        if !self.status.can_transition(to) {
            return Err(StoreError::invalid_transition(self.status, to));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Pending -> Processing.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> StoreResult<()> {
        self.transition(JobStatus::Processing, now)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Processing -> Completed | Failed, with timing and error details.
    pub fn finish(&mut self, completion: &Completion, now: DateTime<Utc>) -> StoreResult<()> {
        completion.validate()?;
        self.transition(completion.terminal_status().as_status(), now)?;
        self.processing_time_ms = Some(completion.processing_time_ms());
        self.completed_at = Some(now);
        if let Completion::Failure {
            error_code,
            error_message,
            ..
        } = completion
        {
            self.error_code = Some(error_code.clone());
            self.error_message = Some(error_message.clone());
        }
        Ok(())
    }

    /// Pending | Processing -> Cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> StoreResult<()> {
        self.transition(JobStatus::Cancelled, now)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_session() -> SessionId {
        SessionId::new("test-session").unwrap()
    }

    fn pending_job() -> Job {
        Job::create(
            NewJob::new(JobType::Ocr, ProcessingParams::empty(), test_session()),
            Utc::now(),
        )
    }

    fn success(ms: i64) -> Completion {
        Completion::Success {
            processing_time_ms: ms,
            results: vec![],
        }
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut job = pending_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.processing_time_ms.is_none());

        job.begin_processing(Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());
        assert!(job.processing_time_ms.is_none());

        job.finish(&success(42), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processing_time_ms, Some(42));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn failure_records_error_details() {
        let mut job = pending_job();
        job.begin_processing(Utc::now()).unwrap();
        job.finish(
            &Completion::Failure {
                processing_time_ms: 7,
                error_code: "DECODE_ERROR".into(),
                error_message: "image too blurry".into(),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_code.as_deref(), Some("DECODE_ERROR"));
        assert_eq!(job.processing_time_ms, Some(7));
    }

    #[test]
    fn terminal_jobs_cannot_be_resurrected() {
        let mut job = pending_job();
        job.begin_processing(Utc::now()).unwrap();
        job.finish(&success(1), Utc::now()).unwrap();

        assert_eq!(
            job.begin_processing(Utc::now()),
            Err(StoreError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Processing,
            })
        );
        assert_eq!(
            job.cancel(Utc::now()),
            Err(StoreError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Cancelled,
            })
        );
    }

    #[test]
    fn pending_job_can_be_cancelled_directly() {
        let mut job = pending_job();
        job.cancel(Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.processing_time_ms.is_none());
    }

    #[test]
    fn completing_a_pending_job_is_rejected() {
        let mut job = pending_job();
        let err = job.finish(&success(1), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed,
            }
        );
    }

    #[test]
    fn negative_processing_time_is_rejected_before_transition() {
        let mut job = pending_job();
        job.begin_processing(Utc::now()).unwrap();
        let err = job.finish(&success(-1), Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        // The job is still Processing and eligible for a retried completion.
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn params_must_be_an_object() {
        assert!(ProcessingParams::from_value(serde_json::json!({"language": "en"})).is_ok());
        assert!(ProcessingParams::from_value(serde_json::Value::Null).is_ok());
        assert!(ProcessingParams::from_value(serde_json::json!([1, 2])).is_err());
        assert!(ProcessingParams::from_value(serde_json::json!("en")).is_err());
    }

    #[test]
    fn language_accessor_ignores_non_strings() {
        let params = ProcessingParams::from_value(serde_json::json!({"language": 42})).unwrap();
        assert_eq!(params.language(), None);
        let params = ProcessingParams::from_value(serde_json::json!({"language": "pt"})).unwrap();
        assert_eq!(params.language(), Some("pt"));
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        for ty in [JobType::Ocr, JobType::Barcode, JobType::Qrcode, JobType::All] {
            assert_eq!(ty.as_str().parse::<JobType>().unwrap(), ty);
        }
    }

    fn arb_status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Pending),
            Just(JobStatus::Processing),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
            Just(JobStatus::Cancelled),
        ]
    }

    proptest! {
        /// Property: no transition ever leaves a terminal state, and the
        /// only state reachable from Pending besides Cancelled is Processing.
        #[test]
        fn legality_table_is_consistent(from in arb_status(), to in arb_status()) {
            let legal = from.can_transition(to);
            if from.is_terminal() {
                prop_assert!(!legal);
            }
            if legal {
                prop_assert!(!to.is_terminal() || from == JobStatus::Processing
                    || (from == JobStatus::Pending && to == JobStatus::Cancelled));
                prop_assert_ne!(from, to);
            }
        }
    }
}
