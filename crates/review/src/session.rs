//! The review-session state machine and its manager.
//!
//! A session walks one owner through a fixed queue of card snapshots:
//!
//! ```text
//! AwaitingReveal ──reveal──▶ AnswerRevealed ──mark──▶ AwaitingReveal (next card)
//!        │                        │    └────────────▶ Completed (queue exhausted)
//!        └────────── stop / inactivity timeout ─────▶ Completed (partial summary)
//! ```
//!
//! Every mutating call verifies the acting owner. The machine itself is
//! synchronous and free of I/O; the caller supplies the mark side effect
//! (stats write, mastery flag) as a closure that runs exactly once after
//! validation and before the cursor advances.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use tango_config::SessionTakeover;
use tango_core::{CardSnapshot, OwnerId};

use crate::error::ReviewError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingReveal,
    AnswerRevealed,
    Completed,
}

/// Review result totals. `total` is the full queue length, so a stopped or
/// timed-out session reports fewer marked cards than `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub correct: u32,
    pub incorrect: u32,
    pub total: usize,
}

/// What happened after a successful `mark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More cards remain; the session is back at `AwaitingReveal`.
    Next,
    /// That was the last card.
    Finished(SessionSummary),
}

#[derive(Debug)]
pub struct ReviewSession {
    owner: OwnerId,
    queue: Vec<CardSnapshot>,
    cursor: usize,
    state: SessionState,
    correct_count: u32,
    incorrect_count: u32,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl ReviewSession {
    fn new(owner: OwnerId, queue: Vec<CardSnapshot>, now: DateTime<Utc>) -> Self {
        Self {
            owner,
            queue,
            cursor: 0,
            state: SessionState::AwaitingReveal,
            correct_count: 0,
            incorrect_count: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Card the cursor is on; `None` once completed.
    pub fn current_card(&self) -> Option<&CardSnapshot> {
        if self.state == SessionState::Completed {
            return None;
        }
        self.queue.get(self.cursor)
    }

    /// Prompt text for the current card — the definition stays hidden until
    /// revealed.
    pub fn current_prompt(&self) -> String {
        match self.current_card() {
            None => {
                let summary = self.summary();
                format!(
                    "Done: {} correct, {} incorrect of {}",
                    summary.correct, summary.incorrect, summary.total
                )
            }
            Some(card) => {
                let position = self.cursor + 1;
                let total = self.queue.len();
                if self.state == SessionState::AnswerRevealed {
                    format!("Q: {}\nA: {}\n({position}/{total})", card.term, card.definition)
                } else {
                    format!("Q: {}\n({position}/{total})", card.term)
                }
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            correct: self.correct_count,
            incorrect: self.incorrect_count,
            total: self.queue.len(),
        }
    }

    fn ensure_owner(&self, acting: OwnerId) -> Result<(), ReviewError> {
        if acting == self.owner {
            Ok(())
        } else {
            Err(ReviewError::Forbidden)
        }
    }

    /// Show the answer for the current card. Idempotent: revealing an
    /// already-revealed card is a no-op, not an error.
    pub fn reveal(&mut self, acting: OwnerId, now: DateTime<Utc>) -> Result<&CardSnapshot, ReviewError> {
        self.ensure_owner(acting)?;
        match self.state {
            SessionState::Completed => Err(ReviewError::InvalidState("session already completed")),
            SessionState::AwaitingReveal | SessionState::AnswerRevealed => {
                self.state = SessionState::AnswerRevealed;
                self.last_activity_at = now;
                Ok(&self.queue[self.cursor])
            }
        }
    }

    /// Mark the revealed card as remembered (`correct = true`) or forgotten.
    ///
    /// `effect` receives the marked card exactly once, after validation and
    /// before the cursor advances — the caller records stats and mastery
    /// there. Marking before reveal is `InvalidState` and changes nothing.
    pub fn mark<E>(
        &mut self,
        acting: OwnerId,
        correct: bool,
        now: DateTime<Utc>,
        effect: E,
    ) -> Result<StepOutcome, ReviewError>
    where
        E: FnOnce(&CardSnapshot),
    {
        self.ensure_owner(acting)?;
        match self.state {
            SessionState::Completed => {
                return Err(ReviewError::InvalidState("session already completed"));
            }
            SessionState::AwaitingReveal => {
                return Err(ReviewError::InvalidState("answer not revealed yet"));
            }
            SessionState::AnswerRevealed => {}
        }

        effect(&self.queue[self.cursor]);

        if correct {
            self.correct_count += 1;
        } else {
            self.incorrect_count += 1;
        }
        self.cursor += 1;
        self.last_activity_at = now;

        if self.cursor == self.queue.len() {
            self.state = SessionState::Completed;
            Ok(StepOutcome::Finished(self.summary()))
        } else {
            self.state = SessionState::AwaitingReveal;
            Ok(StepOutcome::Next)
        }
    }

    /// End the session early, discarding the remaining queue. No stats are
    /// recorded for un-reached cards.
    pub fn stop(&mut self, acting: OwnerId, now: DateTime<Utc>) -> Result<SessionSummary, ReviewError> {
        self.ensure_owner(acting)?;
        if self.state == SessionState::Completed {
            return Err(ReviewError::InvalidState("session already completed"));
        }
        self.last_activity_at = now;
        Ok(self.finish())
    }

    fn finish(&mut self) -> SessionSummary {
        self.state = SessionState::Completed;
        self.summary()
    }

    fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.state != SessionState::Completed && now - self.last_activity_at >= timeout
    }
}

// ── Session manager ──────────────────────────────────────────────────────────

/// Explicit owner→session registry with timeout-based eviction.
///
/// At most one live session per owner. What happens when a second `start`
/// arrives is the configured [`SessionTakeover`] policy: replace
/// (last-start-wins, old session discarded without summary) or reject.
pub struct SessionManager {
    sessions: HashMap<OwnerId, ReviewSession>,
    timeout: Duration,
    takeover: SessionTakeover,
}

impl SessionManager {
    pub fn new(timeout_secs: u64, takeover: SessionTakeover) -> Self {
        Self {
            sessions: HashMap::new(),
            timeout: Duration::seconds(timeout_secs.min(i64::MAX as u64) as i64),
            takeover,
        }
    }

    /// Start a session over `queue` for `owner`.
    pub fn start(
        &mut self,
        owner: OwnerId,
        queue: Vec<CardSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<&ReviewSession, ReviewError> {
        if queue.is_empty() {
            return Err(ReviewError::InvalidState("nothing to review"));
        }

        if let Some(existing) = self.sessions.get(&owner) {
            if existing.is_expired(now, self.timeout) {
                self.sessions.remove(&owner);
            } else {
                match self.takeover {
                    SessionTakeover::Replace => {
                        debug!(owner, "replacing active review session");
                        self.sessions.remove(&owner);
                    }
                    SessionTakeover::Reject => {
                        return Err(ReviewError::InvalidState(
                            "a review session is already active",
                        ));
                    }
                }
            }
        }

        let session = ReviewSession::new(owner, queue, now);
        Ok(self.sessions.entry(owner).or_insert(session))
    }

    /// Look up the live session for `owner`, evicting it first if it timed
    /// out (the expired session completes with partial-summary semantics and
    /// the lookup reports `NotFound`).
    pub fn get_mut(
        &mut self,
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> Result<&mut ReviewSession, ReviewError> {
        if let Some(session) = self.sessions.get(&owner) {
            if session.is_expired(now, self.timeout) {
                if let Some(mut expired) = self.sessions.remove(&owner) {
                    let summary = expired.finish();
                    debug!(owner, ?summary, "review session expired");
                }
                return Err(ReviewError::NotFound);
            }
        }
        self.sessions.get_mut(&owner).ok_or(ReviewError::NotFound)
    }

    pub fn remove(&mut self, owner: OwnerId) -> Option<ReviewSession> {
        self.sessions.remove(&owner)
    }

    /// Evict every timed-out session, returning the partial summaries.
    /// Called from the periodic maintenance tick.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<(OwnerId, SessionSummary)> {
        let expired: Vec<OwnerId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_expired(now, self.timeout))
            .map(|(owner, _)| *owner)
            .collect();
        expired
            .into_iter()
            .filter_map(|owner| {
                self.sessions
                    .remove(&owner)
                    .map(|mut s| (owner, s.finish()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
