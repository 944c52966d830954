//! `scantrack-core` — domain model for image-processing jobs.
//!
//! This crate contains **pure domain** types (no storage concerns): the job
//! lifecycle state machine, typed result payloads, and the per-session usage
//! counters. Persistence lives in `scantrack-store`.

pub mod error;
pub mod id;
pub mod job;
pub mod result;
pub mod session;

pub use error::{StoreError, StoreResult};
pub use id::{JobId, SessionId};
pub use job::{Completion, Job, JobStatus, JobType, NewJob, ProcessingParams, TerminalStatus};
pub use result::{BarcodeResult, OcrResult, QrcodeResult, ResultRow};
pub use session::Session;
