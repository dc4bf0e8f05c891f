//! Frozen due batches.
//!
//! The due-batch pass freezes each owner's batch at delivery time; the
//! owner's next `/review` consumes exactly that batch rather than a
//! recomputed one, so a sweep that flips mastery after delivery cannot race
//! the session. A snooze re-delivers the identical batch. Batches are never
//! persisted — due-ness is always re-derivable from `created_at`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use tango_core::{CardSnapshot, OwnerId};

/// How long an undelivered frozen batch stays resolvable.
const BATCH_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct FrozenBatch {
    /// Opaque token identifying this exact batch (logging / dedupe).
    pub token: Uuid,
    pub owner: OwnerId,
    pub cards: Vec<CardSnapshot>,
    pub created_at: DateTime<Utc>,
}

/// Owner-keyed registry of frozen batches. At most one pending batch per
/// owner; a newer sweep replaces the stale one.
#[derive(Debug, Default)]
pub struct FrozenBatches {
    pending: HashMap<OwnerId, FrozenBatch>,
}

impl FrozenBatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze a batch for `owner`, replacing any previous one. Returns the
    /// batch token.
    pub fn freeze(
        &mut self,
        owner: OwnerId,
        cards: Vec<CardSnapshot>,
        now: DateTime<Utc>,
    ) -> Uuid {
        let batch = FrozenBatch {
            token: Uuid::new_v4(),
            owner,
            cards,
            created_at: now,
        };
        let token = batch.token;
        self.pending.insert(owner, batch);
        token
    }

    /// Consume the pending batch for `owner`, if it exists and hasn't aged
    /// out.
    pub fn take(&mut self, owner: OwnerId, now: DateTime<Utc>) -> Option<FrozenBatch> {
        let batch = self.pending.remove(&owner)?;
        if now - batch.created_at >= Duration::hours(BATCH_TTL_HOURS) {
            return None;
        }
        Some(batch)
    }

    /// Inspect the pending batch without consuming it (snooze re-delivery).
    pub fn peek(&self, owner: OwnerId) -> Option<&FrozenBatch> {
        self.pending.get(&owner)
    }

    /// Put a taken batch back, token and all — used when session start is
    /// refused after the batch was already consumed.
    pub fn restore(&mut self, batch: FrozenBatch) {
        self.pending.insert(batch.owner, batch);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
