//! Telegram command surface: long-polling transport, command routing, and
//! the [`Notifier`] implementation the reminder sweep delivers through.
//!
//! The chat id doubles as the owner id, so every session action is
//! authorized by construction — the engine still re-checks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tango_core::{CardSnapshot, OwnerId, Word};
use tango_review::{ReviewError, SessionSummary};
use tango_runtime::{MarkReply, Notifier, VocabService};

/// Telegram messages cap at 4096 chars; stay under it with headroom.
const CHUNK_LIMIT: usize = 3500;

const HELP_TEXT: &str = "\
/add 単語:意味 — 単語を登録（メッセージをそのまま送ってもOK）
/list — 登録した単語の一覧
/delete <単語> — 単語を削除
/edit <ID> <単語|-> [意味] — 単語を編集
/review — 今日の復習を始める
/quiz — ランダム出題クイズ
/show — 答えを表示
/ok — 覚えた ／ /ng — 忘れた
/stop — 途中でやめる
/later — リマインダーを1時間後にもう一度
/progress — 学習の進み具合";

// ── Notifier ─────────────────────────────────────────────────────────────────

/// Sends sweep notifications over the Telegram Bot API.
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("https://api.telegram.org/bot{token}"),
        }
    }

    /// Build from `TELEGRAM_BOT_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_BOT_TOKEN is not set"))?;
        if token.trim().is_empty() {
            bail!("TELEGRAM_BOT_TOKEN is empty");
        }
        Ok(Self::new(&token))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, owner: OwnerId, text: &str) -> Result<()> {
        for chunk in chunk_message(text, CHUNK_LIMIT) {
            send_message(&self.client, &self.base_url, owner, &chunk).await?;
        }
        Ok(())
    }
}

// ── Bot loop ─────────────────────────────────────────────────────────────────

/// Run the long-polling bot until the process exits.
pub async fn start_bot(service: Arc<VocabService>) -> Result<()> {
    let notifier = Arc::new(TelegramNotifier::from_env()?);
    let client = notifier.client.clone();
    let base_url = notifier.base_url.clone();
    let mut offset: i64 = 0;

    info!("telegram bot initialized, listening for updates");

    loop {
        let updates = match fetch_updates(&client, &base_url, offset).await {
            Ok(u) => u,
            Err(err) => {
                let err_str = err.to_string();
                if err_str.contains("409") {
                    // Another instance is polling — back off and let it win.
                    warn!("409 Conflict: another bot instance is running; waiting 15s");
                    tokio::time::sleep(Duration::from_secs(15)).await;
                } else {
                    warn!(%err, "getUpdates failed — retrying in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                continue;
            }
        };

        for update in updates {
            offset = update.update_id + 1;

            let Some(message) = update.message else {
                continue;
            };
            let Some(text) = message.text else {
                continue;
            };
            let chat_id = message.chat.id;

            let response = match handle_input(&service, &notifier, chat_id, text.trim()).await {
                Ok(r) => r,
                Err(err) => {
                    warn!(chat_id, %err, "handler error");
                    "ごめんね、エラーが起きたみたい。もう一度試してね。".to_string()
                }
            };

            for chunk in chunk_message(&response, CHUNK_LIMIT) {
                if let Err(err) = send_message(&client, &base_url, chat_id, &chunk).await {
                    warn!(chat_id, %err, "sendMessage failed");
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}

// ── Command routing ──────────────────────────────────────────────────────────

async fn handle_input(
    service: &Arc<VocabService>,
    notifier: &Arc<TelegramNotifier>,
    owner: OwnerId,
    line: &str,
) -> Result<String> {
    let line = normalize_command(line);

    if line == "/start" || line == "/help" {
        return Ok(HELP_TEXT.to_string());
    }

    if let Some(rest) = line.strip_prefix("/add") {
        return Ok(render_registration(service, owner, rest)?);
    }

    if line == "/list" {
        return Ok(render_word_list(&service.list_words(owner)?));
    }

    if let Some(term) = line.strip_prefix("/delete ") {
        let removed = service.delete_words(owner, term.trim())?;
        if removed.is_empty() {
            return Ok("該当する単語が見つからなかったよ。".to_string());
        }
        let mut lines = vec!["この単語を削除したよ：".to_string()];
        lines.extend(removed.iter().map(|w| format!("{} | {}", w.term, w.definition)));
        return Ok(lines.join("\n"));
    }

    if let Some(args) = line.strip_prefix("/edit ") {
        return Ok(render_edit(service, owner, args));
    }

    if line == "/review" {
        return Ok(match service.start_review(owner).await {
            Ok(started) => {
                let mut out = String::new();
                if started.from_reminder {
                    out.push_str("じゃあ、はじめよっか！\n\n");
                } else if started.fallback {
                    out.push_str("今日の復習はないから、ランダムに出すね！\n\n");
                }
                out.push_str(&started.prompt);
                out.push_str("\n\n/show で答えを表示");
                out
            }
            Err(err) => review_error_text(&err),
        });
    }

    if line == "/quiz" {
        return Ok(match service.start_quiz(owner).await {
            Ok(started) => format!("{}\n\n/show で答えを表示", started.prompt),
            Err(err) => review_error_text(&err),
        });
    }

    if line == "/show" {
        return Ok(match service.reveal(owner).await {
            Ok(prompt) => format!("{prompt}\n\n/ok 覚えた ／ /ng 忘れた ／ /stop 終了"),
            Err(err) => review_error_text(&err),
        });
    }

    if line == "/ok" || line == "/ng" {
        let correct = line == "/ok";
        return Ok(match service.mark(owner, correct).await {
            Ok(MarkReply::Next { prompt }) => format!("{prompt}\n\n/show で答えを表示"),
            Ok(MarkReply::Finished { summary }) => render_summary(&summary, true),
            Err(err) => review_error_text(&err),
        });
    }

    if line == "/stop" {
        return Ok(match service.stop(owner).await {
            Ok(summary) => render_summary(&summary, false),
            Err(err) => review_error_text(&err),
        });
    }

    if line == "/later" {
        return Ok(snooze(service, notifier, owner).await);
    }

    if line == "/progress" {
        let progress = service.progress(owner, chrono::Utc::now())?;
        return Ok(render_progress(
            &progress,
            &service.config().schedule.intervals,
        ));
    }

    if line.starts_with('/') {
        return Ok("そのコマンドは知らないなぁ。/help を見てね。".to_string());
    }

    // Plain text registers vocabulary, same as /add.
    Ok(render_registration(service, owner, &line)?)
}

fn render_registration(
    service: &Arc<VocabService>,
    owner: OwnerId,
    text: &str,
) -> Result<String> {
    let outcome = service.register(owner, text)?;
    if outcome.created.is_empty() && outcome.updated.is_empty() {
        return Ok(
            "登録する単語が読み取れなかったよ。`単語:意味` の形式で送ってね。".to_string(),
        );
    }

    let mut lines = Vec::new();
    if !outcome.created.is_empty() {
        lines.push("新しく登録したよ：".to_string());
        for word in &outcome.created {
            lines.push(format!("{} | {}", word.term, word.definition));
        }
    }
    if !outcome.updated.is_empty() {
        lines.push("意味を更新したよ：".to_string());
        for update in &outcome.updated {
            lines.push(format!(
                "{} | {} → {}",
                update.term, update.old_definition, update.new_definition
            ));
        }
    }
    Ok(lines.join("\n"))
}

fn render_word_list(words: &[Word]) -> String {
    if words.is_empty() {
        return "まだ単語を登録してないみたい。`単語:意味` を送ってみてね！".to_string();
    }
    let mut lines = vec!["登録した単語一覧：".to_string()];
    for word in words {
        let marker = if word.mastered { " ✓" } else { "" };
        lines.push(format!(
            "ID:{} {} | {}{marker}",
            word.id, word.term, word.definition
        ));
    }
    lines.join("\n")
}

fn render_edit(service: &Arc<VocabService>, owner: OwnerId, args: &str) -> String {
    let mut parts = args.split_whitespace();
    let Some(id) = parts.next().and_then(|raw| raw.parse().ok()) else {
        return "使い方: /edit <ID> <新しい単語|-> [新しい意味]".to_string();
    };
    let new_term = match parts.next() {
        None => return "使い方: /edit <ID> <新しい単語|-> [新しい意味]".to_string(),
        Some("-") => None,
        Some(term) => Some(term),
    };
    let rest = parts.collect::<Vec<_>>().join(" ");
    let new_definition = if rest.is_empty() { None } else { Some(rest.as_str()) };

    match service.edit_word(owner, id, new_term, new_definition) {
        Ok(word) => format!("更新したよ！ {} | {}", word.term, word.definition),
        Err(ReviewError::NotFound) => "そのIDの単語が見つからないよ。".to_string(),
        Err(ReviewError::Forbidden) => "その単語は編集できないよ。".to_string(),
        Err(err) => {
            warn!(owner, %err, "edit failed");
            "編集に失敗したよ、もう一度試してね。".to_string()
        }
    }
}

async fn snooze(
    service: &Arc<VocabService>,
    notifier: &Arc<TelegramNotifier>,
    owner: OwnerId,
) -> String {
    let Some(batch) = service.pending_batch(owner).await else {
        return "いま声かける予定のリマインダーはないよ！".to_string();
    };

    let minutes = service.config().schedule.snooze_minutes;
    let text = format_snoozed_reminder(&batch.cards);
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(minutes * 60)).await;
        if let Err(err) = notifier.deliver(owner, &text).await {
            warn!(owner, %err, "snoozed reminder delivery failed");
        }
    });
    format!("{minutes}分後にまた声かけるね！")
}

/// Re-delivery text for a snoozed batch — the identical card list, not a
/// recomputation.
fn format_snoozed_reminder(cards: &[CardSnapshot]) -> String {
    let mut lines = vec![format!("さっきの続きやろっ！（{}件）", cards.len())];
    lines.extend(cards.iter().map(|c| format!("・{}", c.term)));
    lines.push(String::new());
    lines.push("/review で今すぐ復習".to_string());
    lines.join("\n")
}

fn render_summary(summary: &SessionSummary, finished: bool) -> String {
    let headline = if finished {
        "おつかれさま！今日の復習はここまでだよ！"
    } else {
        "また続きやろうね！"
    };
    format!(
        "{headline}\n正解 {} ／ 不正解 {}（全{}問）",
        summary.correct, summary.incorrect, summary.total
    )
}

fn render_progress(
    progress: &tango_review::ProgressSummary,
    intervals: &[u32],
) -> String {
    let mut lines = vec![
        format!("登録単語: {}語", progress.total),
        format!("今日の復習対象: {}語", progress.due_today),
        "ステージ別：".to_string(),
    ];
    for (stage, count) in progress.stage_counts.iter().enumerate() {
        let label = if stage == 0 {
            "新規".to_string()
        } else if stage == intervals.len() {
            format!("{}日以降", intervals[intervals.len() - 1])
        } else {
            format!("{}日目〜", intervals[stage - 1])
        };
        lines.push(format!("  {label}: {count}語"));
    }
    lines.join("\n")
}

fn review_error_text(err: &ReviewError) -> String {
    match err {
        ReviewError::NotFound => {
            "いま進行中の復習はないよ。/review か /quiz で始めよう！".to_string()
        }
        ReviewError::Forbidden => "これは本人だけのセッションだよ！".to_string(),
        ReviewError::InvalidState("answer not revealed yet") => {
            "まず /show で答えを見てから選んでね！".to_string()
        }
        ReviewError::InvalidState("nothing to review") => {
            "復習する単語がないみたい。まず単語を登録してね！".to_string()
        }
        ReviewError::InvalidState("a review session is already active") => {
            "もう復習中だよ！続きをやろう（/show）".to_string()
        }
        ReviewError::InvalidState(_) => "その操作はいまはできないよ。".to_string(),
        ReviewError::Transient(err) => {
            warn!(%err, "transient engine failure");
            "エラーが起きたよ、もう一度試してね。".to_string()
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

async fn fetch_updates(
    client: &Client,
    base_url: &str,
    offset: i64,
) -> Result<Vec<TelegramUpdate>> {
    let url = format!("{base_url}/getUpdates");
    let response = client
        .get(url)
        .query(&[("timeout", "25"), ("offset", &offset.to_string())])
        .send()
        .await?
        .error_for_status()?;

    let payload: TelegramResponse<Vec<TelegramUpdate>> = response.json().await?;
    if !payload.ok {
        let description = payload
            .description
            .unwrap_or_else(|| "telegram getUpdates failed".to_string());
        bail!(description);
    }

    Ok(payload.result.unwrap_or_default())
}

async fn send_message(client: &Client, base_url: &str, chat_id: i64, text: &str) -> Result<()> {
    let url = format!("{base_url}/sendMessage");
    let body = SendMessageRequest {
        chat_id,
        text,
        disable_web_page_preview: true,
    };

    let response = client
        .post(url)
        .json(&body)
        .send()
        .await?
        .error_for_status()?;

    let payload: TelegramResponse<serde_json::Value> = response.json().await?;
    if !payload.ok {
        let description = payload
            .description
            .unwrap_or_else(|| "telegram sendMessage failed".to_string());
        bail!(description);
    }

    Ok(())
}

/// Strip the `@botname` suffix Telegram appends to commands in groups and
/// normalize surrounding whitespace.
fn normalize_command(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return trimmed.to_string();
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();

    let command = command
        .split_once('@')
        .map(|(base, _)| base)
        .unwrap_or(command);

    if rest.is_empty() {
        command.to_string()
    } else {
        format!("{command} {rest}")
    }
}

fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count() + 1;
        if current_len > 0 && current_len + line_len > max_chars {
            chunks.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
        }
        current.push_str(line);
        current.push('\n');
        current_len += line_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim_end().to_string());
    }

    if chunks.is_empty() {
        chunks.push(text.to_string());
    }
    chunks
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[cfg(test)]
mod tests {
    use super::{chunk_message, normalize_command, render_progress, render_word_list};
    use tango_review::ProgressSummary;

    #[test]
    fn normalizes_bot_mentions_in_commands() {
        assert_eq!(normalize_command("/review@tango_bot"), "/review");
        assert_eq!(
            normalize_command("/delete@tango_bot apple"),
            "/delete apple"
        );
        assert_eq!(normalize_command(" apple:りんご "), "apple:りんご");
    }

    #[test]
    fn chunking_respects_the_limit() {
        let text = (0..200)
            .map(|i| format!("line-{i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_message(&text, 100);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn short_message_is_a_single_chunk() {
        assert_eq!(chunk_message("hello", 100), vec!["hello".to_string()]);
    }

    #[test]
    fn word_list_marks_mastered_entries() {
        use chrono::Utc;
        use tango_core::Word;
        let words = vec![
            Word {
                id: 1,
                owner: 1,
                term: "apple".into(),
                definition: "りんご".into(),
                created_at: Utc::now(),
                mastered: true,
            },
            Word {
                id: 2,
                owner: 1,
                term: "banana".into(),
                definition: "バナナ".into(),
                created_at: Utc::now(),
                mastered: false,
            },
        ];
        let rendered = render_word_list(&words);
        assert!(rendered.contains("ID:1 apple | りんご ✓"));
        assert!(rendered.contains("ID:2 banana | バナナ"));
    }

    #[test]
    fn progress_rendering_labels_all_stages() {
        let progress = ProgressSummary {
            total: 4,
            due_today: 1,
            stage_counts: vec![1, 2, 0, 1],
        };
        let rendered = render_progress(&progress, &[1, 4, 10]);
        assert!(rendered.contains("4語"));
        assert!(rendered.contains("新規: 1語"));
        assert!(rendered.contains("1日目〜: 2語"));
        assert!(rendered.contains("10日以降: 1語"));
    }
}
