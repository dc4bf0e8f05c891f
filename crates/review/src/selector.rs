//! Difficulty-weighted sampling and review-pool construction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rand::Rng;

use tango_core::{Word, WordId, WordStats};

use crate::intervals::is_due;

/// Maximum difficulty weighting strength; anything above is clamped.
pub const MAX_BIAS: f64 = 3.0;

/// Sampling weight of one word.
///
/// Words that have been missed often (many attempts, low accuracy) or that
/// sit at a low ease score weigh more and therefore surface more often.
/// Absent stats count as `(attempts: 0, correct: 0, ease: 2.5)`. At
/// `bias = 0` every word weighs exactly 1 and sampling is uniform.
pub fn weight(stats: Option<&WordStats>, bias: f64) -> f64 {
    let bias = bias.clamp(0.0, MAX_BIAS);
    let (attempts, accuracy, ease) = match stats {
        Some(s) => (f64::from(s.attempts), s.accuracy(), s.ease),
        None => (0.0, 0.0, 2.5),
    };
    1.0 + bias * (attempts * (1.0 - accuracy) + (3.0 - ease))
}

/// Sample `k` distinct items, each draw proportional to its weight.
///
/// Repeats `min(k, len)` times: draw `r` uniform in `[0, total)`, walk the
/// cumulative sums to the first index reaching `r`, remove that pair, and
/// continue with the reduced total. O(k·n) — pools are per-owner and small.
pub fn weighted_sample_without_replacement<T>(
    items: Vec<T>,
    weights: Vec<f64>,
    k: usize,
    rng: &mut impl Rng,
) -> Vec<T> {
    debug_assert_eq!(items.len(), weights.len());
    let mut working: Vec<(T, f64)> = items
        .into_iter()
        .zip(weights)
        .map(|(item, w)| (item, w.max(0.0)))
        .collect();
    let take = k.min(working.len());
    let mut picked = Vec::with_capacity(take);

    for _ in 0..take {
        let total: f64 = working.iter().map(|(_, w)| w).sum();
        let index = if total > 0.0 {
            let r = rng.gen_range(0.0..total);
            let mut cumulative = 0.0;
            let mut chosen = working.len() - 1;
            for (i, (_, w)) in working.iter().enumerate() {
                cumulative += w;
                if cumulative >= r {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            // All remaining weights are zero — fall back to a uniform pick.
            rng.gen_range(0..working.len())
        };
        picked.push(working.swap_remove(index).0);
    }
    picked
}

/// A selected review pool, flagged when it came from the fallback path.
#[derive(Debug, Clone)]
pub struct QuizPool {
    pub cards: Vec<Word>,
    /// True when nothing was due and the pool is a random sample instead.
    pub fallback: bool,
}

/// Collect every due, non-mastered word; when none is due, fall back to a
/// uniform random sample of `sample_size` from the full non-mastered pool.
/// Callers surface the fallback to the user.
pub fn due_or_fallback(
    words: &[Word],
    now: DateTime<Utc>,
    tz: Tz,
    intervals: &[u32],
    sample_size: usize,
    rng: &mut impl Rng,
) -> QuizPool {
    let active: Vec<&Word> = words.iter().filter(|w| !w.mastered).collect();

    let due: Vec<Word> = active
        .iter()
        .filter(|w| is_due(w.created_at, now, tz, intervals))
        .map(|w| (*w).clone())
        .collect();
    if !due.is_empty() {
        return QuizPool {
            cards: due,
            fallback: false,
        };
    }

    let pool: Vec<Word> = active.into_iter().cloned().collect();
    let weights = vec![1.0; pool.len()];
    QuizPool {
        cards: weighted_sample_without_replacement(pool, weights, sample_size, rng),
        fallback: true,
    }
}

/// Difficulty-weighted quiz selection over the non-mastered pool.
pub fn quiz_sample(
    words: &[Word],
    stats: &HashMap<WordId, WordStats>,
    count: usize,
    bias: f64,
    rng: &mut impl Rng,
) -> Vec<Word> {
    let pool: Vec<Word> = words.iter().filter(|w| !w.mastered).cloned().collect();
    let weights: Vec<f64> = pool
        .iter()
        .map(|w| weight(stats.get(&w.id), bias))
        .collect();
    weighted_sample_without_replacement(pool, weights, count, rng)
}
