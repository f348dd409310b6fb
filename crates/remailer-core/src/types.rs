//! Core data model: messages, schedules, and the delivery audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery channel tag. `System` marks synthetic log records written when a
/// dispatch is suppressed entirely (pause, inactive message, no channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelTag {
    Email,
    Telegram,
    System,
}

impl ChannelTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Telegram => "telegram",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "telegram" => Some(Self::Telegram),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Outcome of one channel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Skipped,
    Error,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "skipped" => Some(Self::Skipped),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Content unit redelivered by one or more schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// Human-readable name; doubles as the email subject fallback.
    pub name: String,
    pub subject: Option<String>,
    /// Body text for email.
    pub body: String,
    /// Channel-specific text for Telegram; falls back to `body`.
    pub telegram_text: Option<String>,
    pub email_to: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// An inactive message never dispatches regardless of schedule state.
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Channels applicable to this message, in dispatch order (email before
    /// telegram). Derived, not stored: email iff an address is set, telegram
    /// iff a per-message chat id or the process-wide default is configured.
    pub fn targets(&self, default_chat_id: Option<&str>) -> Vec<ChannelTag> {
        let mut out = Vec::new();
        if self.email_to.as_deref().is_some_and(|s| !s.is_empty()) {
            out.push(ChannelTag::Email);
        }
        let has_chat = self
            .telegram_chat_id
            .as_deref()
            .is_some_and(|s| !s.is_empty())
            || default_chat_id.is_some_and(|s| !s.is_empty());
        if has_chat {
            out.push(ChannelTag::Telegram);
        }
        out
    }
}

/// Floor for `Schedule::interval_seconds`.
pub const MIN_INTERVAL_SECONDS: u32 = 10;
/// Floor for `Schedule::max_per_minute`.
pub const MIN_MAX_PER_MINUTE: u32 = 1;
/// Trailing rate-limit window, in seconds, ending at evaluation time.
pub const RATE_LIMIT_WINDOW_SECONDS: i64 = 60;

/// Binds a message to a cron expression and dispatch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub message_id: i64,
    /// Five-field cron expression, e.g. "*/5 * * * *". Validated at creation.
    pub cron: String,
    /// Activity window: not due before this instant.
    pub start_at: Option<DateTime<Utc>>,
    /// Activity window: not due after this instant.
    pub end_at: Option<DateTime<Utc>>,
    /// Minimum seconds between dispatches (floor 10).
    pub interval_seconds: u32,
    /// Dispatch cap per rolling minute (floor 1).
    pub max_per_minute: u32,
    /// Updated by the dispatcher only, after every dispatch attempt.
    pub last_run_at: Option<DateTime<Utc>>,
    pub is_paused: bool,
    pub created_at: DateTime<Utc>,
}

/// Immutable audit record; one per channel attempt per dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: i64,
    pub schedule_id: i64,
    pub channel: ChannelTag,
    pub status: DeliveryStatus,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message {
            id: 1,
            name: "digest".into(),
            subject: None,
            body: "hello".into(),
            telegram_text: None,
            email_to: None,
            telegram_chat_id: None,
            is_active: true,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_targets_empty() {
        assert!(message().targets(None).is_empty());
    }

    #[test]
    fn test_targets_email_then_telegram() {
        let mut m = message();
        m.email_to = Some("ops@example.com".into());
        m.telegram_chat_id = Some("42".into());
        assert_eq!(m.targets(None), vec![ChannelTag::Email, ChannelTag::Telegram]);
    }

    #[test]
    fn test_targets_default_chat_fallback() {
        let m = message();
        assert_eq!(m.targets(Some("99")), vec![ChannelTag::Telegram]);
        // An empty default does not count as configured.
        assert!(m.targets(Some("")).is_empty());
    }

    #[test]
    fn test_channel_tag_round_trip() {
        for tag in [ChannelTag::Email, ChannelTag::Telegram, ChannelTag::System] {
            assert_eq!(ChannelTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(ChannelTag::parse("smoke"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for st in [
            DeliveryStatus::Sent,
            DeliveryStatus::Skipped,
            DeliveryStatus::Error,
        ] {
            assert_eq!(DeliveryStatus::parse(st.as_str()), Some(st));
        }
    }
}
