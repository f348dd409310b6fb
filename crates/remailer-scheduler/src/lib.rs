//! # Remailer Scheduler
//!
//! The scheduling and dispatch core: decides when a schedule is due, fans due
//! schedules out to delivery channels, records every outcome in the delivery
//! log, and runs the polling loop.
//!
//! ## Architecture
//! ```text
//! Engine (tokio interval, one background task)
//!   └── tick(now): load schedules + messages
//!         ├── is_due: pause → active → window → interval → cron → rate limit
//!         └── Dispatcher (per-schedule lock)
//!               ├── email sender   → DeliveryLog
//!               ├── telegram sender → DeliveryLog
//!               └── last_run_at update
//! ```
//!
//! Stores and channel senders stay behind the `remailer-core` trait seams;
//! `MailerDb` is the SQLite implementation used in production and tests.

pub mod cron;
pub mod dispatch;
pub mod due;
pub mod engine;
pub mod persistence;

pub use cron::CronExpr;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use due::is_due;
pub use engine::{Engine, EngineHandle, spawn_scheduler};
pub use persistence::{MailerDb, NewMessage, NewSchedule};
