//! Owner-level progress reporting.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use tango_core::Word;

use crate::intervals::{is_due, stage};

/// Snapshot of one owner's learning progress.
///
/// `stage_counts` has one bucket per configured interval plus a final
/// "beyond the last interval" bucket; every word lands in exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSummary {
    pub total: usize,
    pub due_today: usize,
    pub stage_counts: Vec<usize>,
}

/// Compute progress over an owner's full word list.
///
/// `due_today` counts only non-mastered words (a mastered word can never be
/// due); `stage_counts` buckets every word, mastered or not, by elapsed time.
pub fn compute_progress(
    words: &[Word],
    now: DateTime<Utc>,
    tz: Tz,
    intervals: &[u32],
) -> ProgressSummary {
    let mut stage_counts = vec![0usize; intervals.len() + 1];
    let mut due_today = 0;

    for word in words {
        stage_counts[stage(word.created_at, now, tz, intervals)] += 1;
        if !word.mastered && is_due(word.created_at, now, tz, intervals) {
            due_today += 1;
        }
    }

    ProgressSummary {
        total: words.len(),
        due_today,
        stage_counts,
    }
}
