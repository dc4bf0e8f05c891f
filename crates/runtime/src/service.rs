//! The vocab service — the single facade both the chat surface and the
//! reminder sweep drive.
//!
//! Owns the word store, the session manager, and the frozen-batch registry.
//! Session and batch state sit behind async mutexes with no await inside a
//! critical section; the state machine itself stays synchronous per call and
//! suspension happens only at store/notification boundaries.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

use tango_config::AppConfig;
use tango_core::{CardSnapshot, OwnerId, Word, WordId, parse_pairs};
use tango_review::{
    ProgressSummary, ReviewError, SessionManager, SessionSummary, StepOutcome, compute_progress,
    difficulty::record_result,
    intervals::is_due,
    selector::{due_or_fallback, quiz_sample},
};
use tango_store::WordStore;

use crate::batches::{FrozenBatch, FrozenBatches};

/// Outcome of a registration message: what was created and what merely got
/// its definition replaced.
#[derive(Debug, Default)]
pub struct Registration {
    pub created: Vec<Word>,
    pub updated: Vec<UpdatedWord>,
}

#[derive(Debug)]
pub struct UpdatedWord {
    pub term: String,
    pub old_definition: String,
    pub new_definition: String,
}

/// A freshly started review session, ready to prompt.
#[derive(Debug)]
pub struct StartedReview {
    pub prompt: String,
    pub total: usize,
    /// Nothing was due — the queue is a random sample instead.
    pub fallback: bool,
    /// The queue came from a frozen reminder batch.
    pub from_reminder: bool,
}

/// Reply to a mark action.
#[derive(Debug)]
pub enum MarkReply {
    Next { prompt: String },
    Finished { summary: SessionSummary },
}

pub struct VocabService {
    config: AppConfig,
    store: WordStore,
    sessions: Mutex<SessionManager>,
    batches: Mutex<FrozenBatches>,
}

impl VocabService {
    pub fn new(config: AppConfig, store: WordStore) -> Self {
        let sessions = SessionManager::new(
            config.review.session_timeout_secs,
            config.review.on_existing_session,
        );
        Self {
            config,
            store,
            sessions: Mutex::new(sessions),
            batches: Mutex::new(FrozenBatches::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &WordStore {
        &self.store
    }

    pub fn tz(&self) -> Tz {
        self.config.schedule.tz()
    }

    // ── Registration & word admin ────────────────────────────────────────────

    /// Parse a registration message and upsert every pair: an existing
    /// (owner, term) gets its definition replaced, everything else is
    /// inserted fresh.
    pub fn register(&self, owner: OwnerId, text: &str) -> anyhow::Result<Registration> {
        let now = Utc::now();
        let mut outcome = Registration::default();
        for (term, definition) in parse_pairs(text) {
            match self.store.find_by_term(owner, &term)? {
                Some(existing) => {
                    self.store
                        .update_word(existing.id, None, Some(&definition))?;
                    outcome.updated.push(UpdatedWord {
                        term,
                        old_definition: existing.definition,
                        new_definition: definition,
                    });
                }
                None => {
                    outcome
                        .created
                        .push(self.store.insert_word(owner, &term, &definition, now)?);
                }
            }
        }
        Ok(outcome)
    }

    pub fn list_words(&self, owner: OwnerId) -> anyhow::Result<Vec<Word>> {
        self.store.words_for_owner(owner)
    }

    /// Delete all of `owner`'s entries for `term`; echoes what was removed.
    pub fn delete_words(&self, owner: OwnerId, term: &str) -> anyhow::Result<Vec<Word>> {
        self.store.delete_by_term(owner, term)
    }

    /// Edit a word by id. Only the owner may edit.
    pub fn edit_word(
        &self,
        owner: OwnerId,
        id: WordId,
        new_term: Option<&str>,
        new_definition: Option<&str>,
    ) -> Result<Word, ReviewError> {
        let word = self
            .store
            .get_word(id)
            .map_err(ReviewError::from)?
            .ok_or(ReviewError::NotFound)?;
        if word.owner != owner {
            return Err(ReviewError::Forbidden);
        }
        self.store
            .update_word(id, new_term, new_definition)
            .map_err(ReviewError::from)?
            .ok_or(ReviewError::NotFound)
    }

    // ── Scheduling queries ───────────────────────────────────────────────────

    /// Every non-mastered word of `owner` due at `now`.
    pub fn compute_due(&self, owner: OwnerId, now: DateTime<Utc>) -> anyhow::Result<Vec<Word>> {
        let tz = self.tz();
        let intervals = &self.config.schedule.intervals;
        Ok(self
            .store
            .words_for_owner(owner)?
            .into_iter()
            .filter(|w| !w.mastered && is_due(w.created_at, now, tz, intervals))
            .collect())
    }

    pub fn progress(&self, owner: OwnerId, now: DateTime<Utc>) -> anyhow::Result<ProgressSummary> {
        let words = self.store.words_for_owner(owner)?;
        Ok(compute_progress(
            &words,
            now,
            self.tz(),
            &self.config.schedule.intervals,
        ))
    }

    /// Difficulty-weighted quiz pool over the owner's non-mastered words.
    pub fn select_quiz_pool(
        &self,
        owner: OwnerId,
        count: usize,
        bias: f64,
    ) -> anyhow::Result<Vec<Word>> {
        let words = self.store.words_for_owner(owner)?;
        let ids: Vec<WordId> = words.iter().map(|w| w.id).collect();
        let stats = self.store.stats_for(&ids)?;
        let mut rng = rand::thread_rng();
        Ok(quiz_sample(&words, &stats, count, bias, &mut rng))
    }

    // ── Frozen batches ───────────────────────────────────────────────────────

    pub async fn freeze_batch(
        &self,
        owner: OwnerId,
        cards: Vec<CardSnapshot>,
        now: DateTime<Utc>,
    ) -> Uuid {
        self.batches.lock().await.freeze(owner, cards, now)
    }

    /// Clone of the owner's pending batch, for snooze re-delivery.
    pub async fn pending_batch(&self, owner: OwnerId) -> Option<FrozenBatch> {
        self.batches.lock().await.peek(owner).cloned()
    }

    // ── Review sessions ──────────────────────────────────────────────────────

    /// Start a review for `owner`.
    ///
    /// A pending frozen batch wins (capped to the reminder batch size);
    /// otherwise the due set is computed fresh, falling back to a random
    /// sample when nothing is due.
    pub async fn start_review(&self, owner: OwnerId) -> Result<StartedReview, ReviewError> {
        let now = Utc::now();

        let frozen = self.batches.lock().await.take(owner, now);
        let (queue, fallback, from_reminder) = match &frozen {
            Some(batch) => {
                let cap = self.config.schedule.reminder_batch_size;
                let cards: Vec<CardSnapshot> = batch.cards.iter().take(cap).cloned().collect();
                (cards, false, true)
            }
            None => {
                let words = self
                    .store
                    .words_for_owner(owner)
                    .map_err(ReviewError::from)?;
                let pool = {
                    let mut rng = rand::thread_rng();
                    due_or_fallback(
                        &words,
                        now,
                        self.tz(),
                        &self.config.schedule.intervals,
                        self.config.schedule.reminder_batch_size,
                        &mut rng,
                    )
                };
                let cards = pool.cards.iter().map(CardSnapshot::from).collect();
                (cards, pool.fallback, false)
            }
        };

        let mut sessions = self.sessions.lock().await;
        let session = match sessions.start(owner, queue, now) {
            Ok(session) => session,
            Err(err) => {
                // Don't lose the reminder batch to a refused start.
                if let Some(batch) = frozen {
                    self.batches.lock().await.restore(batch);
                }
                return Err(err);
            }
        };
        Ok(StartedReview {
            prompt: session.current_prompt(),
            total: session.summary().total,
            fallback,
            from_reminder,
        })
    }

    /// Start an ad-hoc quiz over a weighted sample of the whole pool.
    pub async fn start_quiz(&self, owner: OwnerId) -> Result<StartedReview, ReviewError> {
        let now = Utc::now();
        let pool = self
            .select_quiz_pool(
                owner,
                self.config.review.quiz_size,
                self.config.review.sampling_bias,
            )
            .map_err(ReviewError::from)?;
        let queue: Vec<CardSnapshot> = pool.iter().map(CardSnapshot::from).collect();

        let mut sessions = self.sessions.lock().await;
        let session = sessions.start(owner, queue, now)?;
        Ok(StartedReview {
            prompt: session.current_prompt(),
            total: session.summary().total,
            fallback: false,
            from_reminder: false,
        })
    }

    pub async fn current_prompt(&self, owner: OwnerId) -> Result<String, ReviewError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        Ok(sessions.get_mut(owner, now)?.current_prompt())
    }

    pub async fn reveal(&self, owner: OwnerId) -> Result<String, ReviewError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(owner, now)?;
        session.reveal(owner, now)?;
        Ok(session.current_prompt())
    }

    /// Mark the revealed card. The review outcome and (on success) the
    /// mastered flag are written through the store; a write failure is
    /// logged and the session still advances.
    pub async fn mark(&self, owner: OwnerId, correct: bool) -> Result<MarkReply, ReviewError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(owner, now)?;

        let outcome = session.mark(owner, correct, now, |card| {
            if let Err(err) = record_result(&self.store, card.id, correct, now) {
                error!(word_id = card.id, %err, "review outcome lost — needs reconciliation");
            }
            if correct {
                match self.store.set_mastered(card.id) {
                    Ok(true) => {}
                    Ok(false) => warn!(word_id = card.id, "marked word no longer exists"),
                    Err(err) => error!(word_id = card.id, %err, "failed to set mastered flag"),
                }
            }
        })?;

        match outcome {
            StepOutcome::Next => Ok(MarkReply::Next {
                prompt: session.current_prompt(),
            }),
            StepOutcome::Finished(summary) => {
                sessions.remove(owner);
                Ok(MarkReply::Finished { summary })
            }
        }
    }

    pub async fn stop(&self, owner: OwnerId) -> Result<SessionSummary, ReviewError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(owner, now)?;
        let summary = session.stop(owner, now)?;
        sessions.remove(owner);
        Ok(summary)
    }

    /// Evict timed-out sessions; returns their partial summaries.
    pub async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Vec<(OwnerId, SessionSummary)> {
        self.sessions.lock().await.sweep_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> VocabService {
        let mut config = AppConfig::default();
        config.schedule.timezone = "UTC".to_string();
        let store = WordStore::open(dir.path().join("words.redb")).unwrap();
        VocabService::new(config, store)
    }

    #[test]
    fn register_creates_then_updates() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let first = svc.register(1, "apple:りんご\nbanana:バナナ").unwrap();
        assert_eq!(first.created.len(), 2);
        assert!(first.updated.is_empty());

        let second = svc.register(1, "apple:林檎").unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.updated.len(), 1);
        assert_eq!(second.updated[0].old_definition, "りんご");
        assert_eq!(second.updated[0].new_definition, "林檎");

        let words = svc.list_words(1).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].definition, "林檎");
    }

    #[test]
    fn edit_checks_ownership() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let word = svc.register(1, "apple:りんご").unwrap().created.remove(0);

        assert!(matches!(
            svc.edit_word(2, word.id, Some("x"), None),
            Err(ReviewError::Forbidden)
        ));
        assert!(matches!(
            svc.edit_word(1, 9999, Some("x"), None),
            Err(ReviewError::NotFound)
        ));
        let edited = svc.edit_word(1, word.id, Some("apples"), None).unwrap();
        assert_eq!(edited.term, "apples");
    }

    #[test]
    fn compute_due_honors_intervals_and_mastery() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();

        let due = svc
            .store()
            .insert_word(1, "due", "x", now - Duration::days(1))
            .unwrap();
        svc.store()
            .insert_word(1, "fresh", "y", now)
            .unwrap();
        let mastered = svc
            .store()
            .insert_word(1, "done", "z", now - Duration::days(1))
            .unwrap();
        svc.store().set_mastered(mastered.id).unwrap();

        let due_words = svc.compute_due(1, now).unwrap();
        assert_eq!(due_words.len(), 1);
        assert_eq!(due_words[0].id, due.id);
    }

    #[tokio::test]
    async fn day_one_review_masters_the_word_and_clears_day_four() {
        // Word created day 0 with intervals [1, 4, 10]: due on day 1; after
        // mark(true) it is mastered (ease 2.55, 1/1) and the day-4 sweep
        // skips it even though day 4 would otherwise match.
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.schedule.timezone = "UTC".to_string();
        config.schedule.intervals = vec![1, 4, 10];
        let store = WordStore::open(dir.path().join("words.redb")).unwrap();
        let svc = VocabService::new(config, store);

        let created = Utc::now() - Duration::days(1);
        let word = svc.store().insert_word(1, "apple", "りんご", created).unwrap();

        let day1 = Utc::now();
        assert_eq!(svc.compute_due(1, day1).unwrap().len(), 1);

        let started = svc.start_review(1).await.unwrap();
        assert!(!started.fallback);
        assert_eq!(started.total, 1);

        svc.reveal(1).await.unwrap();
        let reply = svc.mark(1, true).await.unwrap();
        let MarkReply::Finished { summary } = reply else {
            panic!("single-card session should finish");
        };
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.total, 1);

        let stats = svc.store().stats_for(&[word.id]).unwrap();
        assert_eq!(stats[&word.id].attempts, 1);
        assert_eq!(stats[&word.id].correct, 1);
        assert!((stats[&word.id].ease - 2.55).abs() < 1e-9);
        assert!(svc.store().get_word(word.id).unwrap().unwrap().mastered);

        let day4 = created + Duration::days(4);
        assert!(svc.compute_due(1, day4).unwrap().is_empty());
    }

    #[tokio::test]
    async fn incorrect_mark_records_stats_without_mastering() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let created = Utc::now() - Duration::days(1);
        let word = svc.store().insert_word(1, "apple", "りんご", created).unwrap();

        svc.start_review(1).await.unwrap();
        svc.reveal(1).await.unwrap();
        let MarkReply::Finished { summary } = svc.mark(1, false).await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(summary.incorrect, 1);

        let stats = svc.store().stats_for(&[word.id]).unwrap();
        assert!((stats[&word.id].ease - 2.35).abs() < 1e-9);
        assert!(!svc.store().get_word(word.id).unwrap().unwrap().mastered);
    }

    #[tokio::test]
    async fn start_review_reports_fallback_when_nothing_is_due() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        // Registered today — elapsed 0 days, nothing due.
        svc.register(1, "apple:りんご\nbanana:バナナ").unwrap();

        let started = svc.start_review(1).await.unwrap();
        assert!(started.fallback);
        assert!(started.total >= 1);
    }

    #[tokio::test]
    async fn start_review_with_no_words_is_invalid() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(matches!(
            svc.start_review(1).await,
            Err(ReviewError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn frozen_batch_wins_over_recomputation_and_is_capped() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = Utc::now();

        let cards: Vec<CardSnapshot> = (1..=8)
            .map(|id| CardSnapshot {
                id,
                term: format!("term-{id}"),
                definition: format!("def-{id}"),
            })
            .collect();
        svc.freeze_batch(1, cards, now).await;

        let started = svc.start_review(1).await.unwrap();
        assert!(started.from_reminder);
        // Default reminder batch size is 5.
        assert_eq!(started.total, 5);
        assert!(started.prompt.contains("term-1"));

        // The batch was consumed.
        assert!(svc.pending_batch(1).await.is_none());
    }

    #[tokio::test]
    async fn rejected_start_does_not_lose_the_frozen_batch() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.schedule.timezone = "UTC".to_string();
        config.review.on_existing_session = tango_config::SessionTakeover::Reject;
        let store = WordStore::open(dir.path().join("words.redb")).unwrap();
        let svc = VocabService::new(config, store);

        svc.register(1, "apple:りんご").unwrap();
        svc.start_quiz(1).await.unwrap();

        let cards = vec![CardSnapshot {
            id: 99,
            term: "pending".into(),
            definition: "保留".into(),
        }];
        svc.freeze_batch(1, cards, Utc::now()).await;

        assert!(matches!(
            svc.start_review(1).await,
            Err(ReviewError::InvalidState(_))
        ));
        assert!(svc.pending_batch(1).await.is_some());
    }

    #[tokio::test]
    async fn mark_without_reveal_is_invalid_and_harmless() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let word = svc.register(1, "apple:りんご").unwrap().created.remove(0);

        svc.start_quiz(1).await.unwrap();
        assert!(matches!(
            svc.mark(1, true).await,
            Err(ReviewError::InvalidState(_))
        ));
        assert!(svc.store().stats_for(&[word.id]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn quiz_runs_through_whole_pool() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.register(1, "a:1\nb:2\nc:3").unwrap();

        let started = svc.start_quiz(1).await.unwrap();
        assert_eq!(started.total, 3);

        for _ in 0..2 {
            svc.reveal(1).await.unwrap();
            let MarkReply::Next { .. } = svc.mark(1, true).await.unwrap() else {
                panic!("expected more cards");
            };
        }
        svc.reveal(1).await.unwrap();
        let MarkReply::Finished { summary } = svc.mark(1, false).await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(summary.correct + summary.incorrect, 3);
    }

    #[tokio::test]
    async fn stop_mid_quiz_gives_partial_summary() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.register(1, "a:1\nb:2\nc:3").unwrap();

        svc.start_quiz(1).await.unwrap();
        svc.reveal(1).await.unwrap();
        svc.mark(1, true).await.unwrap();

        let summary = svc.stop(1).await.unwrap();
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.total, 3);
        assert!(matches!(
            svc.current_prompt(1).await,
            Err(ReviewError::NotFound)
        ));
    }
}
