//! Per-word difficulty tracking.
//!
//! Every review outcome feeds the word's ease score: +0.05 when remembered,
//! −0.15 when forgotten, always clamped to `[1.3, 3.0]`. The update runs as
//! an atomic read-modify-write through the store so overlapping sessions
//! touching the same word cannot lose attempts.

use chrono::{DateTime, Utc};
use tracing::warn;

use tango_core::{WordId, WordStats};
use tango_store::WordStore;

use crate::error::ReviewError;

pub const EASE_MIN: f64 = 1.3;
pub const EASE_MAX: f64 = 3.0;
pub const EASE_INITIAL: f64 = 2.5;
pub const EASE_GAIN: f64 = 0.05;
pub const EASE_LOSS: f64 = 0.15;

/// Fold one outcome into the current stats row (None on first outcome).
pub fn apply_outcome(
    current: Option<WordStats>,
    word_id: WordId,
    correct: bool,
    when: DateTime<Utc>,
) -> WordStats {
    let delta = if correct { EASE_GAIN } else { -EASE_LOSS };
    match current {
        None => WordStats {
            word_id,
            attempts: 1,
            correct: u32::from(correct),
            ease: (EASE_INITIAL + delta).clamp(EASE_MIN, EASE_MAX),
            last_seen: when,
        },
        Some(mut stats) => {
            stats.attempts += 1;
            if correct {
                stats.correct += 1;
            }
            stats.ease = (stats.ease + delta).clamp(EASE_MIN, EASE_MAX);
            stats.last_seen = when;
            stats
        }
    }
}

/// Record a review outcome for `word_id`.
///
/// A transient store failure is retried once; the second failure is
/// returned to the caller, who logs it and lets the session continue
/// (continuity over strict consistency).
pub fn record_result(
    store: &WordStore,
    word_id: WordId,
    correct: bool,
    when: DateTime<Utc>,
) -> Result<WordStats, ReviewError> {
    match store.upsert_stats(word_id, |current| apply_outcome(current, word_id, correct, when)) {
        Ok(stats) => Ok(stats),
        Err(err) => {
            warn!(word_id, %err, "stats write failed — retrying once");
            store
                .upsert_stats(word_id, |current| apply_outcome(current, word_id, correct, when))
                .map_err(ReviewError::from)
        }
    }
}
