//! The daily reminder sweep.
//!
//! Two independent passes in the configured timezone: the due-batch pass
//! (one notification per owner summarizing today's due words, frozen so the
//! owner's next `/review` gets exactly that batch) and the later inactivity
//! pass (at most one nudge per owner per local calendar day). Both passes
//! recompute everything from `created_at` on every run — no standing
//! per-word timers, so restarts can never duplicate or drop a reminder.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use tango_core::{CardSnapshot, Word};

use crate::notify::Notifier;
use crate::service::VocabService;

/// Compute and deliver every owner's due batch. Per-owner failures are
/// logged and skipped; only a store-wide scan failure aborts the pass.
/// Returns the number of owners notified.
pub async fn run_due_pass(
    service: &VocabService,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let owners = service.store().all_owners()?;
    let mut delivered = 0;

    for owner in owners {
        let due = match service.compute_due(owner, now) {
            Ok(due) => due,
            Err(err) => {
                warn!(owner, %err, "due batch computation failed — skipping owner");
                continue;
            }
        };
        if due.is_empty() {
            continue;
        }

        let cards: Vec<CardSnapshot> = due.iter().map(CardSnapshot::from).collect();
        let text = format_due_reminder(&due);
        // Freeze before delivery so /review resolves the exact batch even if
        // mastery changes between delivery and the owner's reaction.
        let token = service.freeze_batch(owner, cards, now).await;

        match notifier.deliver(owner, &text).await {
            Ok(()) => {
                delivered += 1;
                info!(owner, batch = %token, cards = due.len(), "due reminder delivered");
            }
            Err(err) => {
                warn!(owner, %err, "due reminder delivery failed — skipping owner");
            }
        }
    }

    Ok(delivered)
}

/// Nudge every owner who has words but registered none today. Idempotent
/// per owner per local calendar day (recorded in the store, so restarts
/// don't double-nudge). Returns the number of owners nudged.
pub async fn run_nudge_pass(
    service: &VocabService,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let tz = service.tz();
    let today = now.with_timezone(&tz).date_naive();
    let today_str = today.to_string();
    let owners = service.store().all_owners()?;
    let mut nudged = 0;

    for owner in owners {
        let words = match service.store().words_for_owner(owner) {
            Ok(words) => words,
            Err(err) => {
                warn!(owner, %err, "word scan failed — skipping owner");
                continue;
            }
        };
        if words.is_empty() {
            continue;
        }

        let registered_today = words
            .iter()
            .any(|w| w.created_at.with_timezone(&tz).date_naive() == today);
        if registered_today {
            continue;
        }

        match service.store().last_nudge_date(owner) {
            Ok(Some(date)) if date == today_str => continue,
            Ok(_) => {}
            Err(err) => {
                warn!(owner, %err, "nudge bookkeeping read failed — skipping owner");
                continue;
            }
        }

        match notifier
            .deliver(owner, "今日はまだ新しい単語を登録してないよ！何か覚えた？")
            .await
        {
            Ok(()) => {
                if let Err(err) = service.store().record_nudge(owner, &today_str) {
                    warn!(owner, %err, "failed to record nudge date");
                }
                nudged += 1;
            }
            Err(err) => {
                warn!(owner, %err, "nudge delivery failed — skipping owner");
            }
        }
    }

    Ok(nudged)
}

/// Reminder text listing the due terms, with the resume affordances.
pub fn format_due_reminder(due: &[Word]) -> String {
    let mut lines = vec![format!("今日の復習だよ！（{}件）", due.len())];
    lines.extend(due.iter().map(|w| format!("・{}", w.term)));
    lines.push(String::new());
    lines.push("/review で今すぐ復習、/later で1時間後にもう一度".to_string());
    lines.join("\n")
}

async fn run_due_pass_with_retry(
    service: &VocabService,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
    retry_minutes: u64,
) -> anyhow::Result<usize> {
    match run_due_pass(service, notifier, now).await {
        Ok(delivered) => Ok(delivered),
        Err(err) => {
            warn!(%err, retry_minutes, "due-batch pass failed — retrying once");
            tokio::time::sleep(Duration::from_secs(retry_minutes * 60)).await;
            run_due_pass(service, notifier, Utc::now()).await
        }
    }
}

/// Spawn the daily sweep loop: polls once a minute, fires the due-batch
/// pass at `reminder_hour` (once per local day, recorded in the store) and
/// the inactivity pass at `nudge_hour`.
pub fn spawn_sweep_task(
    service: Arc<VocabService>,
    notifier: Arc<dyn Notifier>,
    shutdown_tx: &watch::Sender<bool>,
) {
    let mut rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let poll = Duration::from_secs(60);
        let mut last_nudge_date: Option<NaiveDate> = None;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = rx.changed() => {
                    if changed.is_ok() && *rx.borrow() { break; }
                    continue;
                }
            }

            let now = Utc::now();
            let tz = service.tz();
            let local = now.with_timezone(&tz);
            let today = local.date_naive();
            let schedule = service.config().schedule.clone();

            if local.hour() == u32::from(schedule.reminder_hour) {
                let already_ran = match service.store().last_due_sweep_date() {
                    Ok(date) => date == Some(today.to_string()),
                    Err(err) => {
                        warn!(%err, "could not read sweep bookkeeping — assuming not run");
                        false
                    }
                };
                if !already_ran {
                    match run_due_pass_with_retry(
                        &service,
                        notifier.as_ref(),
                        now,
                        schedule.sweep_retry_minutes,
                    )
                    .await
                    {
                        Ok(delivered) => {
                            info!(delivered, "due-batch pass complete");
                            if let Err(err) = service.store().record_due_sweep(&today.to_string()) {
                                warn!(%err, "failed to record due sweep date");
                            }
                        }
                        Err(err) => {
                            error!(%err, "due-batch pass failed twice — waiting for next scheduled run");
                        }
                    }
                }
            }

            // Per-owner bookkeeping in the store already makes this pass
            // idempotent; the in-memory date just skips redundant scans
            // within the hour.
            if local.hour() == u32::from(schedule.nudge_hour) && last_nudge_date != Some(today) {
                match run_nudge_pass(&service, notifier.as_ref(), now).await {
                    Ok(nudged) => {
                        info!(nudged, "inactivity pass complete");
                        last_nudge_date = Some(today);
                    }
                    Err(err) => warn!(%err, "inactivity pass failed — will retry next tick"),
                }
            }
        }
    });
}

/// Spawn the session-timeout sweeper: evicts idle sessions once a minute so
/// an abandoned review completes with its partial summary.
pub fn spawn_session_maintenance(
    service: Arc<VocabService>,
    shutdown_tx: &watch::Sender<bool>,
) {
    let mut rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let poll = Duration::from_secs(60);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = rx.changed() => {
                    if changed.is_ok() && *rx.borrow() { break; }
                    continue;
                }
            }

            for (owner, summary) in service.sweep_expired_sessions(Utc::now()).await {
                info!(
                    owner,
                    correct = summary.correct,
                    incorrect = summary.incorrect,
                    total = summary.total,
                    "review session timed out"
                );
            }
        }
    });
}
