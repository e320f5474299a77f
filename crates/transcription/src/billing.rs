//! Billing rule: whole credit-minutes with a one-minute minimum.

pub const MS_PER_MINUTE: i64 = 60_000;
pub const MIN_BILLED_MINUTES: i64 = 1;

/// Credit-minutes charged for a transcript of `duration_ms` audio.
///
/// Partial minutes round down, and every completed job costs at least one
/// minute, including jobs that report zero duration.
pub fn billed_minutes(duration_ms: i64) -> i64 {
    (duration_ms.max(0) / MS_PER_MINUTE).max(MIN_BILLED_MINUTES)
}

/// Whole seconds of audio, as stored on the job record.
pub fn duration_secs(duration_ms: i64) -> i64 {
    duration_ms.max(0) / 1_000
}
