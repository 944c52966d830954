//! `scantrack-store` — durable job lifecycle, session tracking, retention,
//! and usage analytics.
//!
//! ## Components
//!
//! - `JobStore`: the trait the API layer and workers call into
//! - `InMemoryStore`: lock-based store for tests and development
//! - `PostgresStore`: sqlx-backed production store
//! - `StatsSnapshot`: point-in-time analytics over a trailing window
//! - `spawn_sweeper`: background retention purge on a schedule
//!
//! Every transition is an atomic read-modify-write: concurrent callers racing
//! on the same job get exactly one winner, the rest observe
//! `InvalidTransition`. Session counters are folded into the same transaction
//! as the job insert, so `Session::total_jobs` never drifts from the job
//! count.

pub mod memory;
pub mod postgres;
pub mod stats;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod lifecycle_tests;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use stats::StatsSnapshot;
pub use store::{JobStore, JobWithResults};
pub use sweeper::{spawn_sweeper, RetentionPolicy, SweepOutcome, SweeperConfig, SweeperHandle};
