//! Trait seams between the scheduling core and its collaborators: channel
//! senders, the schedule/log stores, and the clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ChannelTag, DeliveryStatus, Message, Schedule};

/// Outcome of a single sender invocation. Senders convert their own failures
/// into an `Error` outcome; `send` itself never fails.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub status: DeliveryStatus,
    pub detail: String,
}

impl SendOutcome {
    pub fn sent() -> Self {
        Self {
            status: DeliveryStatus::Sent,
            detail: String::new(),
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Skipped,
            detail: detail.into(),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Error,
            detail: detail.into(),
        }
    }
}

/// A delivery channel capability. Missing credentials or targets surface as a
/// `Skipped` outcome, never a crash.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Which channel this sender serves.
    fn channel(&self) -> ChannelTag;

    /// Attempt delivery of `message` on this channel.
    async fn send(&self, message: &Message) -> SendOutcome;
}

/// Read/write access to schedules.
pub trait ScheduleStore: Send + Sync {
    /// All schedules joined with their parent message, in stable order.
    fn list_with_messages(&self) -> Result<Vec<(Schedule, Message)>>;

    /// Record a dispatch attempt; the only schedule mutation the core performs.
    fn save_last_run(&self, schedule_id: i64, at: DateTime<Utc>) -> Result<()>;
}

/// Append-only delivery audit log. The trailing-window count feeds the rate
/// limit, so reads must observe all prior appends.
pub trait LogStore: Send + Sync {
    fn append_log(
        &self,
        schedule_id: i64,
        channel: ChannelTag,
        status: DeliveryStatus,
        detail: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    fn count_logs_since(&self, schedule_id: i64, since: DateTime<Utc>) -> Result<u32>;
}

/// Both store halves together, as the dispatcher consumes them.
pub trait DispatchStore: ScheduleStore + LogStore {}
impl<T: ScheduleStore + LogStore> DispatchStore for T {}

/// Injectable current-time source for deterministic tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
