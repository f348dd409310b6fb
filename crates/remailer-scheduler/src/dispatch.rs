//! Dispatch pipeline: fans a schedule out to its applicable channel senders,
//! appends one delivery-log record per attempt, and advances `last_run_at`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use remailer_core::error::Result;
use remailer_core::traits::{ChannelSender, DispatchStore, SendOutcome};
use remailer_core::types::{ChannelTag, DeliveryStatus, Message, Schedule};

use crate::due::is_due;

/// Ceiling on one sender invocation. Senders carry their own transport
/// timeouts; this bounds a sender that never returns.
const SENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Summary of one dispatch: the outcome of the last channel attempted.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub schedule_id: i64,
    pub channel: ChannelTag,
    pub status: DeliveryStatus,
    pub detail: String,
}

/// Fans due schedules out to channel senders and records outcomes.
///
/// Per-schedule locking serializes the rate-limit count against the log
/// appends, so an automatic tick racing a manual trigger cannot both pass the
/// check and double-append.
pub struct Dispatcher {
    senders: Vec<Arc<dyn ChannelSender>>,
    store: Arc<dyn DispatchStore>,
    default_chat_id: Option<String>,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(
        senders: Vec<Arc<dyn ChannelSender>>,
        store: Arc<dyn DispatchStore>,
        default_chat_id: Option<String>,
    ) -> Self {
        Self {
            senders,
            store,
            default_chat_id,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate and dispatch one schedule under its per-schedule lock.
    /// Automatic mode runs the due-check first and returns `None` when the
    /// schedule is not due; manual mode bypasses the due-check (but dispatch
    /// still re-checks the pause/inactive guard).
    pub async fn run_schedule(
        &self,
        schedule: &Schedule,
        message: &Message,
        now: DateTime<Utc>,
        manual: bool,
    ) -> Result<Option<DispatchOutcome>> {
        if manual {
            return self.dispatch_manual(schedule, message, now).await.map(Some);
        }
        let lock = self.lock_for(schedule.id);
        let _guard = lock.lock().await;

        if !is_due(schedule, message, now, self.store.as_ref())? {
            return Ok(None);
        }
        self.dispatch(schedule, message, now).await.map(Some)
    }

    /// Operator-triggered dispatch: no due-check, but still serialized per
    /// schedule and still subject to the pause/inactive guard.
    pub async fn dispatch_manual(
        &self,
        schedule: &Schedule,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let lock = self.lock_for(schedule.id);
        let _guard = lock.lock().await;
        self.dispatch(schedule, message, now).await
    }

    /// Attempt delivery across all applicable channels, appending one log per
    /// channel in invocation order, then advance `last_run_at` — even on
    /// partial failure, so a persistently-failing channel is throttled by the
    /// interval rather than retried hot. Callers go through `run_schedule`;
    /// only tests exercise this directly.
    pub(crate) async fn dispatch(
        &self,
        schedule: &Schedule,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        // Re-checked here, not trusted from the due-check: state may have
        // changed between evaluation and dispatch.
        if schedule.is_paused || !message.is_active {
            let detail = if schedule.is_paused {
                "Schedule is paused"
            } else {
                "Message is inactive"
            };
            self.store.append_log(
                schedule.id,
                ChannelTag::System,
                DeliveryStatus::Skipped,
                detail,
                now,
            )?;
            return Ok(DispatchOutcome {
                schedule_id: schedule.id,
                channel: ChannelTag::System,
                status: DeliveryStatus::Skipped,
                detail: detail.into(),
            });
        }

        let targets = message.targets(self.default_chat_id.as_deref());
        let mut results: Vec<(ChannelTag, SendOutcome)> = Vec::new();
        for tag in &targets {
            let outcome = match self.senders.iter().find(|s| s.channel() == *tag) {
                Some(sender) => match tokio::time::timeout(SENDER_TIMEOUT, sender.send(message))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => SendOutcome::error(format!(
                        "Send timed out after {}s",
                        SENDER_TIMEOUT.as_secs()
                    )),
                },
                None => SendOutcome::skipped("No sender configured"),
            };
            tracing::debug!(
                schedule_id = schedule.id,
                channel = tag.as_str(),
                status = outcome.status.as_str(),
                "channel attempt"
            );
            results.push((*tag, outcome));
        }

        for (tag, outcome) in &results {
            self.store
                .append_log(schedule.id, *tag, outcome.status, &outcome.detail, now)?;
        }

        let outcome = match results.pop() {
            Some((tag, last)) => DispatchOutcome {
                schedule_id: schedule.id,
                channel: tag,
                status: last.status,
                detail: last.detail,
            },
            // No applicable channels: synthetic outcome only, no log record,
            // so a misconfigured schedule does not eat rate-limit budget.
            None => DispatchOutcome {
                schedule_id: schedule.id,
                channel: ChannelTag::System,
                status: DeliveryStatus::Skipped,
                detail: "No channels".into(),
            },
        };

        // Strictly after all channel attempts.
        self.store.save_last_run(schedule.id, now)?;
        Ok(outcome)
    }

    fn lock_for(&self, schedule_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(schedule_id).or_default().clone()
    }
}
