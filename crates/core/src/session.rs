//! Per-client activity summary, derived from job creation.
//!
//! A session row is upserted in the same transaction as every job insert, so
//! `total_jobs` always equals the number of jobs ever created for that
//! session key. The counter logic lives here as pure functions of `now`; the
//! store backends only decide *when* to run it atomically.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::id::SessionId;

/// Derived per-session usage counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    /// Last-seen client address; overwritten on every job.
    pub client_ip: Option<String>,
    /// Last known identity; only replaced by a non-empty value.
    pub user_agent: Option<String>,
    /// Monotonically non-decreasing job counter.
    pub total_jobs: i64,
    /// Jobs created on `last_job_date`; resets to 1 when the day advances.
    pub jobs_today: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_job_date: NaiveDate,
}

impl Session {
    /// First job for an unseen session key.
    pub fn open(
        session_id: SessionId,
        now: DateTime<Utc>,
        client_ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Self {
        Self {
            session_id,
            client_ip: client_ip.map(str::to_owned),
            user_agent: nonempty(user_agent),
            total_jobs: 1,
            jobs_today: 1,
            first_seen: now,
            last_seen: now,
            last_job_date: now.date_naive(),
        }
    }

    /// Fold one more job into the counters.
    pub fn record_job(&mut self, now: DateTime<Utc>, client_ip: Option<&str>, user_agent: Option<&str>) {
        let today = now.date_naive();
        self.total_jobs += 1;
        self.jobs_today = if self.last_job_date == today {
            self.jobs_today + 1
        } else {
            1
        };
        self.last_job_date = today;
        self.last_seen = now;
        if let Some(ip) = client_ip {
            self.client_ip = Some(ip.to_owned());
        }
        if let Some(ua) = nonempty(user_agent) {
            self.user_agent = Some(ua);
        }
    }
}

fn nonempty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sid() -> SessionId {
        SessionId::new("abc").unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn first_job_opens_with_unit_counters() {
        let s = Session::open(sid(), at(2026, 3, 1, 9), Some("10.0.0.1"), Some("curl/8"));
        assert_eq!(s.total_jobs, 1);
        assert_eq!(s.jobs_today, 1);
        assert_eq!(s.last_job_date, at(2026, 3, 1, 9).date_naive());
        assert_eq!(s.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn same_day_jobs_increment_both_counters() {
        let mut s = Session::open(sid(), at(2026, 3, 1, 9), None, None);
        s.record_job(at(2026, 3, 1, 10), None, None);
        s.record_job(at(2026, 3, 1, 23), None, None);
        assert_eq!(s.total_jobs, 3);
        assert_eq!(s.jobs_today, 3);
    }

    #[test]
    fn day_rollover_resets_jobs_today_to_one() {
        // Three jobs on day D, one on D+1: total 4, today 1.
        let mut s = Session::open(sid(), at(2026, 3, 1, 9), None, None);
        s.record_job(at(2026, 3, 1, 12), None, None);
        s.record_job(at(2026, 3, 1, 18), None, None);
        s.record_job(at(2026, 3, 2, 1), None, None);
        assert_eq!(s.total_jobs, 4);
        assert_eq!(s.jobs_today, 1);
        assert_eq!(s.last_job_date, at(2026, 3, 2, 1).date_naive());
    }

    #[test]
    fn empty_user_agent_preserves_last_identity() {
        let mut s = Session::open(sid(), at(2026, 3, 1, 9), None, Some("firefox"));
        s.record_job(at(2026, 3, 1, 10), None, Some(""));
        assert_eq!(s.user_agent.as_deref(), Some("firefox"));
        s.record_job(at(2026, 3, 1, 11), None, Some("chrome"));
        assert_eq!(s.user_agent.as_deref(), Some("chrome"));
        s.record_job(at(2026, 3, 1, 12), None, None);
        assert_eq!(s.user_agent.as_deref(), Some("chrome"));
    }

    #[test]
    fn client_ip_is_overwritten() {
        let mut s = Session::open(sid(), at(2026, 3, 1, 9), Some("10.0.0.1"), None);
        s.record_job(at(2026, 3, 1, 10), Some("10.0.0.2"), None);
        assert_eq!(s.client_ip.as_deref(), Some("10.0.0.2"));
    }
}
