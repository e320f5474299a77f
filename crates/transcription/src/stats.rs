//! Per-account usage summary.

use serde::Serialize;

use crate::job::{JobStatus, TranscriptionJob};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub total_transcriptions: usize,
    pub completed_count: usize,
    /// Pending and processing jobs together.
    pub processing_count: usize,
    pub failed_count: usize,
    pub total_minutes_used: i64,
    pub credits_remaining: i64,
}

impl JobStats {
    pub fn summarize<'a>(jobs: impl IntoIterator<Item = &'a TranscriptionJob>, credits_remaining: i64) -> Self {
        let mut stats = JobStats {
            credits_remaining,
            ..Default::default()
        };

        for job in jobs {
            stats.total_transcriptions += 1;
            match job.status {
                JobStatus::Completed => {
                    stats.completed_count += 1;
                    stats.total_minutes_used += job.credits_charged.unwrap_or(0);
                }
                JobStatus::Pending | JobStatus::Processing => stats.processing_count += 1,
                JobStatus::Failed => stats.failed_count += 1,
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::job::tests::pending_job;
    use crate::job::CompletedTranscript;

    #[test]
    fn summarize_counts_by_status() {
        let pending = pending_job();

        let mut failed = pending_job();
        failed.mark_processing().unwrap();
        failed.mark_failed("boom").unwrap();

        let mut completed = pending_job();
        completed.mark_processing().unwrap();
        completed
            .mark_completed(CompletedTranscript {
                text: "t".to_string(),
                exports: BTreeMap::new(),
                duration_secs: 180,
                billed_minutes: 3,
            })
            .unwrap();

        let stats = JobStats::summarize([&pending, &failed, &completed], 297);
        assert_eq!(stats.total_transcriptions, 3);
        assert_eq!(stats.processing_count, 1);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.completed_count, 1);
        assert_eq!(stats.total_minutes_used, 3);
        assert_eq!(stats.credits_remaining, 297);
    }
}
