//! Analytics snapshot and the shared arithmetic both backends use.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Reported when no OCR job in the window carries a `language` param.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Point-in-time usage analytics over a trailing window.
///
/// All counts come from one consistent read, so they are mutually consistent
/// even under concurrent job writes (e.g. `successful_jobs + failed_jobs`
/// never exceeds `total_jobs`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub period_days: u32,
    pub generated_at: DateTime<Utc>,
    pub total_jobs: i64,
    pub successful_jobs: i64,
    pub failed_jobs: i64,
    pub pending_jobs: i64,
    pub processing_jobs: i64,
    /// successful / total * 100, 2 decimals; 0.0 for an empty window.
    pub success_rate: f64,
    /// Mean over jobs with a recorded time, 2 decimals; None when no job in
    /// the window has one.
    pub avg_processing_time_ms: Option<f64>,
    pub ocr_jobs: i64,
    pub barcode_jobs: i64,
    pub qrcode_jobs: i64,
    pub unique_sessions: i64,
    /// Most frequent `language` param among OCR jobs in the window; ties go
    /// to the lexicographically smallest value.
    pub top_language: String,
}

/// Round to 2 decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage of successful jobs; 0.0 (not NaN, not an error) when the
/// window is empty.
pub(crate) fn success_rate(successful: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round2(successful as f64 / total as f64 * 100.0)
}

/// Pick the mode of a language frequency table.
///
/// Deterministic tie-break: among values with the maximal count, the
/// lexicographically smallest wins. Empty input yields [`UNKNOWN_LANGUAGE`].
pub(crate) fn top_language<I, S>(frequencies: I) -> String
where
    I: IntoIterator<Item = (S, u64)>,
    S: AsRef<str>,
{
    let mut best: Option<(String, u64)> = None;
    for (language, count) in frequencies {
        let language = language.as_ref();
        best = match best {
            None => Some((language.to_owned(), count)),
            Some((bl, bn)) if count > bn || (count == bn && language < bl.as_str()) => {
                Some((language.to_owned(), count))
            }
            keep => keep,
        };
    }
    best.map_or_else(|| UNKNOWN_LANGUAGE.to_owned(), |(l, _)| l)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_handles_empty_window() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert!(success_rate(0, 0).is_finite());
    }

    #[test]
    fn success_rate_rounds_to_two_decimals() {
        // 5 completed out of 7 -> 71.4285..% -> 71.43
        assert_eq!(success_rate(5, 7), 71.43);
        assert_eq!(success_rate(1, 3), 33.33);
        assert_eq!(success_rate(2, 3), 66.67);
        assert_eq!(success_rate(7, 7), 100.0);
    }

    #[test]
    fn top_language_picks_the_mode() {
        let freq = [("en", 3u64), ("pt", 5), ("de", 1)];
        assert_eq!(top_language(freq), "pt");
    }

    #[test]
    fn top_language_breaks_ties_lexicographically() {
        let freq = [("pt", 2u64), ("en", 2), ("de", 1)];
        assert_eq!(top_language(freq), "en");
    }

    #[test]
    fn top_language_defaults_to_unknown() {
        assert_eq!(top_language(Vec::<(&str, u64)>::new()), UNKNOWN_LANGUAGE);
    }
}
