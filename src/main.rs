//! # Remailer CLI
//!
//! Scheduled message redelivery over email and Telegram.
//!
//! Usage:
//!   remailer serve                      # Run the scheduler loop
//!   remailer tick                       # Single polling pass
//!   remailer send 3                     # Dispatch schedule 3 now
//!   remailer message add --name ...     # Create a message
//!   remailer schedule add --message 1 --cron "*/5 * * * *"
//!   remailer logs 3                     # Recent delivery logs

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use remailer_channels::senders_from_config;
use remailer_core::{RemailerConfig, SystemClock};
use remailer_scheduler::{CronExpr, Engine, MailerDb, NewMessage, NewSchedule, spawn_scheduler};

#[derive(Parser)]
#[command(
    name = "remailer",
    version,
    about = "📮 Remailer — cron-scheduled message redelivery over email and Telegram"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file to ~/.remailer/config.toml
    Init,

    /// Run the scheduler loop until interrupted
    Serve {
        /// Override the tick period in seconds
        #[arg(long)]
        tick_seconds: Option<u64>,
    },

    /// Run a single polling pass and exit
    Tick,

    /// Dispatch a schedule immediately (bypasses the due-check)
    Send {
        schedule_id: i64,
    },

    /// Manage messages
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },

    /// Manage schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Show recent delivery logs for a schedule
    Logs {
        schedule_id: i64,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum MessageAction {
    /// Create a message
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        email_to: Option<String>,
        #[arg(long)]
        telegram_chat_id: Option<String>,
        #[arg(long)]
        telegram_text: Option<String>,
    },
    /// List all messages
    List,
    /// Deactivate a message (all its schedules stop dispatching)
    Deactivate { id: i64 },
    /// Reactivate a message
    Activate { id: i64 },
    /// Delete a message and its schedules
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Attach a cron schedule to a message
    Add {
        #[arg(long)]
        message: i64,
        /// Five-field cron expression, e.g. "*/5 * * * *"
        #[arg(long)]
        cron: String,
        /// Minimum seconds between dispatches (default from config)
        #[arg(long)]
        interval: Option<u32>,
        /// Dispatch cap per rolling minute (default from config)
        #[arg(long)]
        max_per_minute: Option<u32>,
        /// Activity window start (RFC 3339)
        #[arg(long)]
        start_at: Option<String>,
        /// Activity window end (RFC 3339)
        #[arg(long)]
        end_at: Option<String>,
    },
    /// List all schedules with their next run
    List,
    /// Pause a schedule
    Pause { id: i64 },
    /// Resume a paused schedule
    Resume { id: i64 },
    /// Delete a schedule and its logs
    Delete { id: i64 },
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow::anyhow!("invalid timestamp '{s}': {e}"))?
        .with_timezone(&Utc))
}

fn load_config(cli: &Cli) -> Result<RemailerConfig> {
    match &cli.config {
        Some(path) => Ok(RemailerConfig::load_from(Path::new(path))?),
        None => Ok(RemailerConfig::load()?),
    }
}

fn open_db(cli: &Cli, config: &RemailerConfig) -> Result<Arc<MailerDb>> {
    let raw = cli.db.clone().unwrap_or_else(|| config.db_path.clone());
    let path = shellexpand::tilde(&raw).to_string();
    if let Some(parent) = Path::new(&path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(MailerDb::open(Path::new(&path))?))
}

fn build_engine(db: Arc<MailerDb>, config: &RemailerConfig) -> Arc<Engine> {
    let senders = senders_from_config(config);
    let default_chat_id = config.default_chat_id().map(String::from);
    Arc::new(Engine::new(
        db,
        senders,
        default_chat_id,
        Arc::new(SystemClock),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "remailer=debug"
    } else {
        "remailer=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    if let Commands::Init = cli.command {
        let path = RemailerConfig::default_path();
        if path.exists() {
            anyhow::bail!("config already exists at {}", path.display());
        }
        let written = RemailerConfig::default().save()?;
        println!("✅ Wrote default config to {}", written.display());
        return Ok(());
    }

    let config = load_config(&cli)?;
    let db = open_db(&cli, &config)?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Serve { tick_seconds } => {
            let engine = build_engine(db, &config);
            let secs = tick_seconds.unwrap_or(config.scheduler.tick_seconds);
            let Some(handle) = spawn_scheduler(&engine, std::time::Duration::from_secs(secs))
            else {
                anyhow::bail!("scheduler loop already running");
            };
            println!("📮 Remailer serving (tick every {secs}s). Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
            handle.stop().await;
            println!("Stopped.");
        }

        Commands::Tick => {
            let engine = build_engine(db, &config);
            let dispatched = engine.run_tick().await?;
            println!("✅ Tick complete: {dispatched} schedule(s) dispatched");
        }

        Commands::Send { schedule_id } => {
            let engine = build_engine(db, &config);
            let outcome = engine.dispatch_by_id(schedule_id).await?;
            println!(
                "{} schedule {}: {}/{}{}",
                if outcome.status == remailer_core::DeliveryStatus::Error {
                    "⚠️"
                } else {
                    "✅"
                },
                schedule_id,
                outcome.channel.as_str(),
                outcome.status.as_str(),
                if outcome.detail.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", outcome.detail)
                }
            );
        }

        Commands::Message { action } => match action {
            MessageAction::Add {
                name,
                body,
                subject,
                email_to,
                telegram_chat_id,
                telegram_text,
            } => {
                let message = db.create_message(&NewMessage {
                    name,
                    subject,
                    body,
                    telegram_text,
                    email_to,
                    telegram_chat_id,
                    created_by: None,
                })?;
                println!("✅ Message {} created: '{}'", message.id, message.name);
            }
            MessageAction::List => {
                for m in db.list_messages()? {
                    let targets: Vec<&str> = m
                        .targets(config.default_chat_id())
                        .iter()
                        .map(|t| t.as_str())
                        .collect();
                    println!(
                        "{:>4}  {}  [{}]  {}",
                        m.id,
                        if m.is_active { "active  " } else { "inactive" },
                        targets.join(", "),
                        m.name
                    );
                }
            }
            MessageAction::Deactivate { id } => {
                db.set_message_active(id, false)?;
                println!("⏸ Message {id} deactivated");
            }
            MessageAction::Activate { id } => {
                db.set_message_active(id, true)?;
                println!("▶ Message {id} activated");
            }
            MessageAction::Delete { id } => {
                db.delete_message(id)?;
                println!("🗑 Message {id} deleted");
            }
        },

        Commands::Schedule { action } => match action {
            ScheduleAction::Add {
                message,
                cron,
                interval,
                max_per_minute,
                start_at,
                end_at,
            } => {
                let schedule = db.create_schedule(&NewSchedule {
                    message_id: message,
                    cron,
                    start_at: start_at.as_deref().map(parse_instant).transpose()?,
                    end_at: end_at.as_deref().map(parse_instant).transpose()?,
                    interval_seconds: interval
                        .unwrap_or(config.scheduler.default_interval_seconds),
                    max_per_minute: max_per_minute
                        .unwrap_or(config.scheduler.default_max_per_minute),
                })?;
                println!(
                    "✅ Schedule {} created: message {} @ '{}'",
                    schedule.id, schedule.message_id, schedule.cron
                );
            }
            ScheduleAction::List => {
                let now = Utc::now().naive_utc();
                for s in db.list_schedules()? {
                    let next = CronExpr::parse(&s.cron)
                        .ok()
                        .and_then(|e| e.next_after(now))
                        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                        .unwrap_or_else(|| "never".into());
                    println!(
                        "{:>4}  msg {:>3}  '{}'  {}  next: {}",
                        s.id,
                        s.message_id,
                        s.cron,
                        if s.is_paused { "paused " } else { "running" },
                        next
                    );
                }
            }
            ScheduleAction::Pause { id } => {
                db.set_paused(id, true)?;
                println!("⏸ Schedule {id} paused");
            }
            ScheduleAction::Resume { id } => {
                db.set_paused(id, false)?;
                println!("▶ Schedule {id} resumed");
            }
            ScheduleAction::Delete { id } => {
                db.delete_schedule(id)?;
                println!("🗑 Schedule {id} deleted");
            }
        },

        Commands::Logs { schedule_id, limit } => {
            for log in db.recent_logs(schedule_id, limit)? {
                println!(
                    "{}  {:<8}  {:<7}  {}",
                    log.created_at.format("%Y-%m-%d %H:%M:%S"),
                    log.channel.as_str(),
                    log.status.as_str(),
                    log.detail
                );
            }
        }
    }

    Ok(())
}
