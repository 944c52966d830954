//! End-to-end lifecycle and analytics tests run against the trait surface,
//! using the in-memory backend.

use std::sync::Arc;

use scantrack_core::{
    Completion, JobStatus, JobType, NewJob, ProcessingParams, ResultRow, SessionId,
};

use crate::memory::InMemoryStore;
use crate::stats;
use crate::store::JobStore;
use crate::sweeper::RetentionPolicy;

fn sid(raw: &str) -> SessionId {
    SessionId::new(raw).unwrap()
}

fn ocr_params(language: &str) -> ProcessingParams {
    ProcessingParams::from_value(serde_json::json!({ "language": language })).unwrap()
}

fn new_job(job_type: JobType, session: &str) -> NewJob {
    NewJob::new(job_type, ProcessingParams::empty(), sid(session))
}

async fn run_to_success<S: JobStore>(
    store: &S,
    new: NewJob,
    time_ms: i64,
    results: Vec<ResultRow>,
) -> scantrack_core::JobId {
    let job = store.create_job(new).await.unwrap();
    store.mark_processing(job.id).await.unwrap();
    store
        .complete_job(
            job.id,
            Completion::Success {
                processing_time_ms: time_ms,
                results,
            },
        )
        .await
        .unwrap();
    job.id
}

async fn run_to_failure<S: JobStore>(store: &S, new: NewJob, time_ms: i64) {
    let job = store.create_job(new).await.unwrap();
    store.mark_processing(job.id).await.unwrap();
    store
        .complete_job(
            job.id,
            Completion::Failure {
                processing_time_ms: time_ms,
                error_code: "DECODE_ERROR".into(),
                error_message: "could not decode image".into(),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn full_lifecycle_reflects_in_stats_and_session() {
    let store = InMemoryStore::new();

    let id = run_to_success(
        &store,
        NewJob::new(JobType::Ocr, ocr_params("en"), sid("client-a"))
            .with_client_ip("203.0.113.9")
            .with_user_agent("scanner/2.1"),
        420,
        vec![ResultRow::ocr("invoice total 42.00", Some("en"))],
    )
    .await;

    let fetched = store.get_job(id).await.unwrap();
    assert_eq!(fetched.job.status, JobStatus::Completed);
    assert_eq!(fetched.job.processing_time_ms, Some(420));
    assert!(fetched.job.started_at.is_some());
    assert!(fetched.job.completed_at.is_some());
    assert_eq!(fetched.results.len(), 1);

    let session = store.get_session(&sid("client-a")).await.unwrap();
    assert_eq!(session.total_jobs, 1);
    assert_eq!(session.jobs_today, 1);
    assert_eq!(session.client_ip.as_deref(), Some("203.0.113.9"));

    let snapshot = store.aggregate(30).await.unwrap();
    assert_eq!(snapshot.total_jobs, 1);
    assert_eq!(snapshot.successful_jobs, 1);
    assert_eq!(snapshot.success_rate, 100.0);
    assert_eq!(snapshot.avg_processing_time_ms, Some(420.0));
    assert_eq!(snapshot.top_language, "en");
}

#[tokio::test]
async fn success_rate_over_mixed_outcomes() {
    let store = InMemoryStore::new();
    for i in 0..5 {
        run_to_success(
            &store,
            new_job(JobType::Barcode, &format!("s-{i}")),
            100,
            vec![ResultRow::barcode("0123456789", "ean13")],
        )
        .await;
    }
    for _ in 0..2 {
        run_to_failure(&store, new_job(JobType::Barcode, "s-fail"), 50).await;
    }

    let snapshot = store.aggregate(7).await.unwrap();
    assert_eq!(snapshot.total_jobs, 7);
    assert_eq!(snapshot.successful_jobs, 5);
    assert_eq!(snapshot.failed_jobs, 2);
    // 5/7 = 71.428..%, rounded to 2 decimals.
    assert_eq!(snapshot.success_rate, 71.43);
    assert_eq!(snapshot.unique_sessions, 6);
}

#[tokio::test]
async fn empty_window_is_zero_not_nan() {
    let store = InMemoryStore::new();
    let snapshot = store.aggregate(7).await.unwrap();
    assert_eq!(snapshot.total_jobs, 0);
    assert_eq!(snapshot.success_rate, 0.0);
    assert!(snapshot.success_rate.is_finite());
    assert_eq!(snapshot.avg_processing_time_ms, None);
    assert_eq!(snapshot.top_language, stats::UNKNOWN_LANGUAGE);
    assert_eq!(snapshot.unique_sessions, 0);
}

#[tokio::test]
async fn per_type_counts_and_in_flight_jobs() {
    let store = InMemoryStore::new();

    run_to_success(
        &store,
        new_job(JobType::Qrcode, "s-1"),
        10,
        vec![ResultRow::qrcode("https://example.com")],
    )
    .await;
    // One left pending, one left processing.
    store.create_job(new_job(JobType::Ocr, "s-2")).await.unwrap();
    let processing = store.create_job(new_job(JobType::Barcode, "s-3")).await.unwrap();
    store.mark_processing(processing.id).await.unwrap();

    let snapshot = store.aggregate(7).await.unwrap();
    assert_eq!(snapshot.total_jobs, 3);
    assert_eq!(snapshot.pending_jobs, 1);
    assert_eq!(snapshot.processing_jobs, 1);
    assert_eq!(snapshot.ocr_jobs, 1);
    assert_eq!(snapshot.barcode_jobs, 1);
    assert_eq!(snapshot.qrcode_jobs, 1);
    // In-flight jobs count against the denominator.
    assert_eq!(snapshot.success_rate, 33.33);
}

#[tokio::test]
async fn top_language_is_the_mode_with_lexicographic_tie_break() {
    let store = InMemoryStore::new();
    for language in ["en", "en", "de"] {
        store
            .create_job(NewJob::new(JobType::Ocr, ocr_params(language), sid("s-l")))
            .await
            .unwrap();
    }
    let snapshot = store.aggregate(7).await.unwrap();
    assert_eq!(snapshot.top_language, "en");

    // Tie between de (2) and en (2): the smaller string wins.
    store
        .create_job(NewJob::new(JobType::Ocr, ocr_params("de"), sid("s-l")))
        .await
        .unwrap();
    let snapshot = store.aggregate(7).await.unwrap();
    assert_eq!(snapshot.top_language, "de");
}

#[tokio::test]
async fn top_language_ignores_non_ocr_jobs() {
    let store = InMemoryStore::new();
    // Barcode jobs may carry a language param; it must not count.
    for _ in 0..3 {
        store
            .create_job(NewJob::new(JobType::Barcode, ocr_params("fr"), sid("s-b")))
            .await
            .unwrap();
    }
    store
        .create_job(NewJob::new(JobType::Ocr, ocr_params("en"), sid("s-b")))
        .await
        .unwrap();

    let snapshot = store.aggregate(7).await.unwrap();
    assert_eq!(snapshot.top_language, "en");
}

#[tokio::test]
async fn avg_processing_time_rounds_to_two_decimals() {
    let store = InMemoryStore::new();
    for (i, ms) in [100, 150, 101].into_iter().enumerate() {
        run_to_success(
            &store,
            new_job(JobType::Qrcode, &format!("s-{i}")),
            ms,
            vec![ResultRow::qrcode("payload")],
        )
        .await;
    }
    // Cancelled jobs have no recorded time and stay out of the mean.
    let cancelled = store.create_job(new_job(JobType::Qrcode, "s-c")).await.unwrap();
    store.cancel_job(cancelled.id).await.unwrap();

    let snapshot = store.aggregate(7).await.unwrap();
    // (100 + 150 + 101) / 3 = 117.0
    assert_eq!(snapshot.avg_processing_time_ms, Some(117.0));
    assert_eq!(snapshot.total_jobs, 4);
    assert_eq!(snapshot.successful_jobs, 3);
}

#[tokio::test]
async fn sweep_then_aggregate_sees_only_surviving_jobs() {
    let store = InMemoryStore::new();

    let old = run_to_success(
        &store,
        new_job(JobType::Ocr, "s-old"),
        10,
        vec![ResultRow::ocr("stale", None)],
    )
    .await;
    store.backdate_job(old, 120);
    store.backdate_session(&sid("s-old"), 40);

    run_to_success(
        &store,
        new_job(JobType::Ocr, "s-new"),
        10,
        vec![ResultRow::ocr("fresh", None)],
    )
    .await;

    let outcome = store.sweep(&RetentionPolicy::default()).await.unwrap();
    assert_eq!(outcome.jobs_deleted, 1);
    assert_eq!(outcome.sessions_deleted, 1);

    // 120-day-old jobs were already outside the 90-day window, but their
    // sessions and rows are now gone entirely.
    assert!(store.get_job(old).await.is_err());
    assert!(store.get_session(&sid("s-old")).await.is_err());

    let snapshot = store.aggregate(365).await.unwrap();
    assert_eq!(snapshot.total_jobs, 1);
    assert_eq!(snapshot.unique_sessions, 1);
}

#[tokio::test]
async fn arc_dyn_store_is_usable_behind_the_trait() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
    let job = store.create_job(new_job(JobType::All, "s-dyn")).await.unwrap();
    store.mark_processing(job.id).await.unwrap();
    store
        .complete_job(
            job.id,
            Completion::Success {
                processing_time_ms: 5,
                results: vec![
                    ResultRow::ocr("text", Some("en")),
                    ResultRow::barcode("123", "code128"),
                    ResultRow::qrcode("qr"),
                ],
            },
        )
        .await
        .unwrap();
    let fetched = store.get_job(job.id).await.unwrap();
    assert_eq!(fetched.results.len(), 3);
}
