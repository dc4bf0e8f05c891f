use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tango_config::AppConfig;
use tango_runtime::{
    VocabService, run_due_pass, run_nudge_pass, spawn_session_maintenance, spawn_sweep_task,
};
use tango_store::WordStore;
use tango_telegram::{TelegramNotifier, start_bot};

#[derive(Debug, Parser)]
#[command(
    name = "tango",
    version,
    about = "A spaced-repetition vocabulary bot for Telegram"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "tango.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the bot: Telegram long-polling plus the daily reminder sweep.
    Start,
    /// Run one reminder sweep now instead of waiting for the schedule.
    Sweep {
        /// Compute and print the due batches without delivering anything.
        #[arg(long)]
        dry_run: bool,
        /// Also run the inactivity-nudge pass.
        #[arg(long)]
        nudge: bool,
    },
    /// Inspect or edit the word store directly.
    Words {
        #[command(subcommand)]
        command: WordCommands,
    },
    /// Show an owner's learning progress.
    Progress { owner: i64 },
}

#[derive(Debug, Subcommand)]
enum WordCommands {
    /// List every word registered by an owner.
    List { owner: i64 },
    /// Register pairs for an owner (same `term:definition` format as chat).
    Add { owner: i64, text: String },
    /// Delete an owner's entries for a term.
    Delete { owner: i64, term: String },
}

fn open_service(config_path: &PathBuf) -> Result<VocabService> {
    let config = AppConfig::load_from(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    let store_path = PathBuf::from(&config.bot.data_dir).join("words.redb");
    let store = WordStore::open(&store_path)?;
    Ok(VocabService::new(config, store))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            let service = Arc::new(open_service(&cli.config)?);
            let notifier = Arc::new(TelegramNotifier::from_env()?);

            let (shutdown_tx, _) = watch::channel(false);
            spawn_sweep_task(Arc::clone(&service), notifier, &shutdown_tx);
            spawn_session_maintenance(Arc::clone(&service), &shutdown_tx);
            info!(timezone = %service.tz(), "sweep scheduled, starting bot");

            let bot = tokio::spawn(start_bot(Arc::clone(&service)));
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            let _ = shutdown_tx.send(true);
            bot.abort();
        }
        Commands::Sweep { dry_run, nudge } => {
            let service = open_service(&cli.config)?;
            let now = Utc::now();

            if dry_run {
                for owner in service.store().all_owners()? {
                    let due = service.compute_due(owner, now)?;
                    if !due.is_empty() {
                        let terms: Vec<&str> = due.iter().map(|w| w.term.as_str()).collect();
                        println!("owner {owner}: {} due — {}", due.len(), terms.join(", "));
                    }
                }
                return Ok(());
            }

            let notifier = TelegramNotifier::from_env()?;
            let delivered = run_due_pass(&service, &notifier, now).await?;
            println!("due reminders delivered to {delivered} owner(s)");
            if nudge {
                let nudged = run_nudge_pass(&service, &notifier, now).await?;
                println!("nudges delivered to {nudged} owner(s)");
            }
        }
        Commands::Words { command } => {
            let service = open_service(&cli.config)?;
            match command {
                WordCommands::List { owner } => {
                    for word in service.list_words(owner)? {
                        let marker = if word.mastered { " [mastered]" } else { "" };
                        println!(
                            "{:>4}  {} | {}{marker}  ({})",
                            word.id,
                            word.term,
                            word.definition,
                            word.created_at.format("%Y-%m-%d")
                        );
                    }
                }
                WordCommands::Add { owner, text } => {
                    let outcome = service.register(owner, &text)?;
                    println!(
                        "created {} word(s), updated {}",
                        outcome.created.len(),
                        outcome.updated.len()
                    );
                }
                WordCommands::Delete { owner, term } => {
                    let removed = service.delete_words(owner, &term)?;
                    println!("deleted {} word(s)", removed.len());
                }
            }
        }
        Commands::Progress { owner } => {
            let service = open_service(&cli.config)?;
            let progress = service.progress(owner, Utc::now())?;
            let intervals = &service.config().schedule.intervals;
            println!("total: {}", progress.total);
            println!("due today: {}", progress.due_today);
            for (stage, count) in progress.stage_counts.iter().enumerate() {
                let label = if stage == 0 {
                    "new".to_string()
                } else if stage == intervals.len() {
                    format!("beyond day {}", intervals[intervals.len() - 1])
                } else {
                    format!("day {}+", intervals[stage - 1])
                };
                println!("  {label}: {count}");
            }
        }
    }

    Ok(())
}
