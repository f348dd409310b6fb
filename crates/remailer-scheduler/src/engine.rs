//! Tick engine — the polling loop that evaluates all schedules and invokes
//! the dispatcher for the due ones. One dedicated tokio task; a tick is a
//! standalone operation the loop merely calls on a timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use remailer_core::error::Result;
use remailer_core::traits::{ChannelSender, Clock, DispatchStore, ScheduleStore};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::persistence::MailerDb;

/// The scheduling engine: owns the store, the dispatcher, and the clock.
pub struct Engine {
    db: Arc<MailerDb>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

impl Engine {
    pub fn new(
        db: Arc<MailerDb>,
        senders: Vec<Arc<dyn ChannelSender>>,
        default_chat_id: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = db.clone() as Arc<dyn DispatchStore>;
        Self {
            db,
            dispatcher: Dispatcher::new(senders, store, default_chat_id),
            clock,
            running: AtomicBool::new(false),
        }
    }

    /// One polling pass at `now`. The single time snapshot is used for every
    /// schedule in the pass so boundary decisions do not skew between
    /// schedules. Returns how many schedules dispatched. A store failure
    /// loading the list aborts the pass; a single schedule's dispatch failure
    /// is logged and the pass continues.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let pairs = self.db.list_with_messages()?;
        let mut dispatched = 0;
        for (schedule, message) in &pairs {
            match self
                .dispatcher
                .run_schedule(schedule, message, now, false)
                .await
            {
                Ok(Some(outcome)) => {
                    dispatched += 1;
                    tracing::info!(
                        "📨 Dispatched schedule {} ({}): {}/{}",
                        schedule.id,
                        message.name,
                        outcome.channel.as_str(),
                        outcome.status.as_str()
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("⚠️ Dispatch failed for schedule {}: {e}", schedule.id);
                }
            }
        }
        Ok(dispatched)
    }

    /// Tick at the injected clock's current time.
    pub async fn run_tick(&self) -> Result<usize> {
        let now = self.clock.now();
        self.tick(now).await
    }

    /// Operator-triggered dispatch: bypasses the due-check, keeps the
    /// pause/inactive guard.
    pub async fn dispatch_by_id(&self, schedule_id: i64) -> Result<DispatchOutcome> {
        let (schedule, message) = self.db.schedule_with_message(schedule_id)?;
        let now = self.clock.now();
        self.dispatcher.dispatch_manual(&schedule, &message, now).await
    }

    pub fn store(&self) -> &Arc<MailerDb> {
        &self.db
    }
}

/// Spawn the scheduler loop as a background tokio task. Idempotent: a second
/// call while the loop is running returns `None`. Tick errors are swallowed
/// at the tick boundary so the next timer fire is unaffected.
pub fn spawn_scheduler(engine: &Arc<Engine>, interval: Duration) -> Option<EngineHandle> {
    if engine.running.swap(true, Ordering::SeqCst) {
        tracing::warn!("Scheduler loop already running; start ignored");
        return None;
    }
    tracing::info!("⏰ Scheduler started (tick every {}s)", interval.as_secs());

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task_engine = Arc::clone(engine);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = task_engine.run_tick().await {
                        tracing::warn!("⚠️ Tick aborted: {e}");
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Scheduler loop stopping");
                    break;
                }
            }
        }
    });

    Some(EngineHandle {
        shutdown: shutdown_tx,
        handle,
        engine: Arc::clone(engine),
    })
}

/// Handle to a running loop; dropping it without `stop` leaves the loop
/// running until process exit.
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    engine: Arc<Engine>,
}

impl EngineHandle {
    /// Signal shutdown and wait for the loop to finish its current tick.
    /// Clears the running guard, so the engine can be spawned again.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
        self.engine.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{NewMessage, NewSchedule};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use remailer_core::traits::SendOutcome;
    use remailer_core::types::{ChannelTag, DeliveryStatus, Message};

    struct CountingSender {
        calls: Arc<std::sync::Mutex<u32>>,
    }

    #[async_trait]
    impl ChannelSender for CountingSender {
        fn channel(&self) -> ChannelTag {
            ChannelTag::Email
        }

        async fn send(&self, _message: &Message) -> SendOutcome {
            *self.calls.lock().unwrap() += 1;
            SendOutcome::sent()
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn boundary() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 30, 10, 5, 0).unwrap()
    }

    fn engine_with_fixtures() -> (Arc<Engine>, Arc<std::sync::Mutex<u32>>, i64) {
        let db = Arc::new(MailerDb::open_in_memory().unwrap());
        let message = db
            .create_message(&NewMessage {
                name: "digest".into(),
                body: "hello".into(),
                email_to: Some("ops@example.com".into()),
                ..Default::default()
            })
            .unwrap();
        let due = db
            .create_schedule(&NewSchedule {
                message_id: message.id,
                cron: "*/5 * * * *".into(),
                start_at: None,
                end_at: None,
                interval_seconds: 60,
                max_per_minute: 30,
            })
            .unwrap();
        // Not due at the five-minute boundary.
        db.create_schedule(&NewSchedule {
            message_id: message.id,
            cron: "7 * * * *".into(),
            start_at: None,
            end_at: None,
            interval_seconds: 60,
            max_per_minute: 30,
        })
        .unwrap();

        let calls = Arc::new(std::sync::Mutex::new(0));
        let sender = Arc::new(CountingSender {
            calls: calls.clone(),
        });
        let engine = Arc::new(Engine::new(
            db,
            vec![sender],
            None,
            Arc::new(FixedClock(boundary())),
        ));
        (engine, calls, due.id)
    }

    #[tokio::test]
    async fn test_tick_dispatches_only_due_schedules() {
        let (engine, calls, due_id) = engine_with_fixtures();
        let dispatched = engine.run_tick().await.unwrap();
        assert_eq!(dispatched, 1);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(
            engine.store().get_schedule(due_id).unwrap().last_run_at,
            Some(boundary())
        );
    }

    #[tokio::test]
    async fn test_second_tick_throttled_by_interval() {
        let (engine, calls, _) = engine_with_fixtures();
        assert_eq!(engine.run_tick().await.unwrap(), 1);
        // Same snapshot: interval throttle suppresses the repeat dispatch.
        assert_eq!(engine.run_tick().await.unwrap(), 0);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_manual_dispatch_bypasses_due_check() {
        let (engine, calls, due_id) = engine_with_fixtures();
        engine.run_tick().await.unwrap();
        // Throttled for the loop, but the operator path still sends.
        let outcome = engine.dispatch_by_id(due_id).await.unwrap();
        assert_eq!(outcome.status, DeliveryStatus::Sent);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stops() {
        let (engine, _, _) = engine_with_fixtures();
        let handle = spawn_scheduler(&engine, Duration::from_secs(3600)).unwrap();
        assert!(spawn_scheduler(&engine, Duration::from_secs(3600)).is_none());
        handle.stop().await;

        // Stopping clears the guard: the engine can be spawned again.
        let restarted = spawn_scheduler(&engine, Duration::from_secs(3600)).unwrap();
        restarted.stop().await;
    }
}
