use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned word identifier, unique across all owners.
pub type WordId = u64;

/// Owner identifier — the chat id of the user who registered the word.
pub type OwnerId = i64;

/// A term/definition pair owned by one user.
///
/// `mastered` is terminal: once set the word is permanently excluded from
/// due-based scheduling. Only the review engine flips it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub id: WordId,
    pub owner: OwnerId,
    pub term: String,
    pub definition: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub mastered: bool,
}

/// Per-word review statistics, created lazily on the first recorded outcome.
///
/// Invariants: `correct <= attempts`; `ease` stays within `[1.3, 3.0]`
/// (clamped on every update by the difficulty tracker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordStats {
    pub word_id: WordId,
    pub attempts: u32,
    pub correct: u32,
    pub ease: f64,
    pub last_seen: DateTime<Utc>,
}

impl WordStats {
    /// Fraction of attempts answered correctly; 0 when never attempted.
    pub fn accuracy(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            f64::from(self.correct) / f64::from(self.attempts)
        }
    }
}

/// Immutable snapshot of a word as queued into a review session.
///
/// Sessions hold snapshots rather than live rows so a concurrent edit or
/// delete never shifts the queue under an active review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSnapshot {
    pub id: WordId,
    pub term: String,
    pub definition: String,
}

impl From<&Word> for CardSnapshot {
    fn from(word: &Word) -> Self {
        Self {
            id: word.id,
            term: word.term.clone(),
            definition: word.definition.clone(),
        }
    }
}
