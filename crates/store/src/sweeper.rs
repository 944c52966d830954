//! Retention sweeper: policy knobs and the periodic background task.
//!
//! The sweep itself lives on [`JobStore`] so both backends share the
//! semantics; this module owns the policy, its environment overrides, and the
//! tokio task that invokes the sweep on an interval until shut down.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::store::JobStore;

pub const DEFAULT_JOB_RETENTION_DAYS: u32 = 90;
pub const DEFAULT_SESSION_INACTIVITY_DAYS: u32 = 30;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

const ENV_JOB_RETENTION_DAYS: &str = "SCANTRACK_JOB_RETENTION_DAYS";
const ENV_SESSION_INACTIVITY_DAYS: &str = "SCANTRACK_SESSION_INACTIVITY_DAYS";
const ENV_SWEEP_INTERVAL_SECS: &str = "SCANTRACK_SWEEP_INTERVAL_SECS";

/// Age thresholds for expiring jobs and stale sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Jobs created more than this many days ago are deleted, whatever their
    /// status. Result rows go with the job.
    pub job_retention_days: u32,
    /// Sessions with no activity for this many days are deleted.
    pub session_inactivity_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            job_retention_days: DEFAULT_JOB_RETENTION_DAYS,
            session_inactivity_days: DEFAULT_SESSION_INACTIVITY_DAYS,
        }
    }
}

impl RetentionPolicy {
    /// Read overrides from the environment. An unset variable keeps the
    /// default; a present but unparsable one is logged and ignored.
    pub fn from_env() -> Self {
        Self {
            job_retention_days: env_u32(ENV_JOB_RETENTION_DAYS, DEFAULT_JOB_RETENTION_DAYS),
            session_inactivity_days: env_u32(
                ENV_SESSION_INACTIVITY_DAYS,
                DEFAULT_SESSION_INACTIVITY_DAYS,
            ),
        }
    }
}

/// What one sweep pass removed. All-zero on a quiet store, which also makes
/// an immediate rerun's outcome comparable to [`SweepOutcome::default`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub jobs_deleted: u64,
    pub sessions_deleted: u64,
}

impl SweepOutcome {
    pub fn is_empty(&self) -> bool {
        self.jobs_deleted == 0 && self.sessions_deleted == 0
    }
}

/// Configuration for the background sweeper task.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub policy: RetentionPolicy,
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            policy: RetentionPolicy::default(),
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl SweeperConfig {
    pub fn from_env() -> Self {
        Self {
            policy: RetentionPolicy::from_env(),
            interval: Duration::from_secs(env_u64(
                ENV_SWEEP_INTERVAL_SECS,
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
        }
    }
}

/// Handle to a running sweeper task. Dropping the handle detaches the task;
/// call [`SweeperHandle::shutdown`] for an orderly stop.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the task to stop and wait for it to finish its current pass.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = %e, "sweeper task panicked");
        }
    }
}

/// Spawn the periodic sweeper on the current tokio runtime.
///
/// Sweep failures are logged and the loop continues; a transiently
/// unavailable store must not kill retention permanently.
pub fn spawn_sweeper<S>(store: Arc<S>, config: SweeperConfig) -> SweeperHandle
where
    S: JobStore + ?Sized + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let join = tokio::spawn(async move {
        info!(
            interval_secs = config.interval.as_secs(),
            job_retention_days = config.policy.job_retention_days,
            session_inactivity_days = config.policy.session_inactivity_days,
            "retention sweeper started"
        );
        let mut ticker = tokio::time::interval(config.interval);
        // The first tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.sweep(&config.policy).await {
                        Ok(outcome) if outcome.is_empty() => {
                            debug!("sweep pass removed nothing");
                        }
                        Ok(outcome) => {
                            info!(
                                jobs_deleted = outcome.jobs_deleted,
                                sessions_deleted = outcome.sessions_deleted,
                                "sweep pass complete"
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "sweep pass failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("retention sweeper stopping");
                    break;
                }
            }
        }
    });
    SweeperHandle { shutdown_tx, join }
}

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u32>() {
            Ok(v) if v > 0 => v,
            _ => {
                warn!(var = name, value = %raw, "ignoring invalid retention setting");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(v) if v > 0 => v,
            _ => {
                warn!(var = name, value = %raw, "ignoring invalid sweeper setting");
                default
            }
        },
        Err(_) => default,
    }
}
