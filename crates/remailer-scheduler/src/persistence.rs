//! SQLite-backed store for messages, schedules, and delivery logs.
//! Single-file database, idempotent migration, cascading deletes.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use remailer_core::error::{RemailerError, Result};
use remailer_core::traits::{LogStore, ScheduleStore};
use remailer_core::types::{
    ChannelTag, DeliveryLog, DeliveryStatus, Message, Schedule, MIN_INTERVAL_SECONDS,
    MIN_MAX_PER_MINUTE,
};

use crate::cron::CronExpr;

/// Fields for creating a message.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub name: String,
    pub subject: Option<String>,
    pub body: String,
    pub telegram_text: Option<String>,
    pub email_to: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub created_by: Option<String>,
}

/// Fields for creating a schedule. Validated before insert.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub message_id: i64,
    pub cron: String,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub interval_seconds: u32,
    pub max_per_minute: u32,
}

/// SQLite persistence for the scheduling core.
pub struct MailerDb {
    conn: Mutex<Connection>,
}

/// Fixed-width UTC stamp so string comparison in SQL matches time order.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl MailerDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| RemailerError::store(format!("DB open: {e}")))?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RemailerError::store(format!("DB open: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| RemailerError::store(format!("Pragma: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                subject TEXT,
                body TEXT NOT NULL,
                telegram_text TEXT,
                email_to TEXT,
                telegram_chat_id TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_by TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                cron TEXT NOT NULL,
                start_at TEXT,
                end_at TEXT,
                interval_seconds INTEGER NOT NULL,
                max_per_minute INTEGER NOT NULL,
                last_run_at TEXT,
                is_paused INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS delivery_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schedule_id INTEGER NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_logs_schedule_created
                ON delivery_logs(schedule_id, created_at);
         ",
            )
            .map_err(|e| RemailerError::store(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Messages ──────────────────────────────────────

    pub fn create_message(&self, new: &NewMessage) -> Result<Message> {
        if new.name.is_empty() {
            return Err(RemailerError::validation("message name must not be empty"));
        }
        let created_at = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages
             (name, subject, body, telegram_text, email_to, telegram_chat_id,
              is_active, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)",
            rusqlite::params![
                new.name,
                new.subject,
                new.body,
                new.telegram_text,
                new.email_to,
                new.telegram_chat_id,
                new.created_by,
                ts(created_at),
            ],
        )
        .map_err(|e| RemailerError::store(format!("Save message: {e}")))?;
        Ok(Message {
            id: conn.last_insert_rowid(),
            name: new.name.clone(),
            subject: new.subject.clone(),
            body: new.body.clone(),
            telegram_text: new.telegram_text.clone(),
            email_to: new.email_to.clone(),
            telegram_chat_id: new.telegram_chat_id.clone(),
            is_active: true,
            created_by: new.created_by.clone(),
            created_at,
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Message> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => RemailerError::MessageNotFound(id),
                other => RemailerError::store(format!("Get message: {other}")),
            })
    }

    pub fn list_messages(&self) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY id"
            ))
            .map_err(|e| RemailerError::store(format!("List messages: {e}")))?;
        let rows = stmt
            .query_map([], message_from_row)
            .map_err(|e| RemailerError::store(format!("List messages: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RemailerError::store(format!("List messages: {e}")))
    }

    pub fn set_message_active(&self, id: i64, active: bool) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE messages SET is_active = ?1 WHERE id = ?2",
                rusqlite::params![active as i32, id],
            )
            .map_err(|e| RemailerError::store(format!("Update message: {e}")))?;
        if changed == 0 {
            return Err(RemailerError::MessageNotFound(id));
        }
        Ok(())
    }

    /// Delete a message; its schedules and their logs cascade.
    pub fn delete_message(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute("DELETE FROM messages WHERE id = ?1", [id])
            .map_err(|e| RemailerError::store(format!("Delete message: {e}")))?;
        if changed == 0 {
            return Err(RemailerError::MessageNotFound(id));
        }
        Ok(())
    }

    // ─── Schedules ──────────────────────────────────────

    /// Create a schedule. The cron expression and policy floors are validated
    /// here — the evaluator later assumes a well-formed expression.
    pub fn create_schedule(&self, new: &NewSchedule) -> Result<Schedule> {
        CronExpr::parse(&new.cron)?;
        if new.interval_seconds < MIN_INTERVAL_SECONDS {
            return Err(RemailerError::validation(format!(
                "interval_seconds must be at least {MIN_INTERVAL_SECONDS}"
            )));
        }
        if new.max_per_minute < MIN_MAX_PER_MINUTE {
            return Err(RemailerError::validation(format!(
                "max_per_minute must be at least {MIN_MAX_PER_MINUTE}"
            )));
        }
        // Reject dangling message references up front.
        self.get_message(new.message_id)?;

        let created_at = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO schedules
             (message_id, cron, start_at, end_at, interval_seconds, max_per_minute,
              last_run_at, is_paused, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0, ?7)",
            rusqlite::params![
                new.message_id,
                new.cron,
                new.start_at.map(ts),
                new.end_at.map(ts),
                new.interval_seconds,
                new.max_per_minute,
                ts(created_at),
            ],
        )
        .map_err(|e| RemailerError::store(format!("Save schedule: {e}")))?;
        Ok(Schedule {
            id: conn.last_insert_rowid(),
            message_id: new.message_id,
            cron: new.cron.clone(),
            start_at: new.start_at,
            end_at: new.end_at,
            interval_seconds: new.interval_seconds,
            max_per_minute: new.max_per_minute,
            last_run_at: None,
            is_paused: false,
            created_at,
        })
    }

    pub fn get_schedule(&self, id: i64) -> Result<Schedule> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                [id],
                schedule_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => RemailerError::ScheduleNotFound(id),
                other => RemailerError::store(format!("Get schedule: {other}")),
            })
    }

    pub fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY id"
            ))
            .map_err(|e| RemailerError::store(format!("List schedules: {e}")))?;
        let rows = stmt
            .query_map([], schedule_from_row)
            .map_err(|e| RemailerError::store(format!("List schedules: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RemailerError::store(format!("List schedules: {e}")))
    }

    /// One schedule joined with its parent message (manual dispatch path).
    pub fn schedule_with_message(&self, id: i64) -> Result<(Schedule, Message)> {
        let schedule = self.get_schedule(id)?;
        let message = self.get_message(schedule.message_id)?;
        Ok((schedule, message))
    }

    pub fn set_paused(&self, id: i64, paused: bool) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE schedules SET is_paused = ?1 WHERE id = ?2",
                rusqlite::params![paused as i32, id],
            )
            .map_err(|e| RemailerError::store(format!("Update schedule: {e}")))?;
        if changed == 0 {
            return Err(RemailerError::ScheduleNotFound(id));
        }
        Ok(())
    }

    pub fn delete_schedule(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute("DELETE FROM schedules WHERE id = ?1", [id])
            .map_err(|e| RemailerError::store(format!("Delete schedule: {e}")))?;
        if changed == 0 {
            return Err(RemailerError::ScheduleNotFound(id));
        }
        Ok(())
    }

    // ─── Delivery logs ──────────────────────────────────────

    /// Most recent logs for a schedule, newest first.
    pub fn recent_logs(&self, schedule_id: i64, limit: usize) -> Result<Vec<DeliveryLog>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, schedule_id, channel, status, detail, created_at
                 FROM delivery_logs WHERE schedule_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| RemailerError::store(format!("List logs: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![schedule_id, limit as i64], |row| {
                let channel: String = row.get(2)?;
                let status: String = row.get(3)?;
                let created_at: String = row.get(5)?;
                Ok(DeliveryLog {
                    id: row.get(0)?,
                    schedule_id: row.get(1)?,
                    channel: ChannelTag::parse(&channel).unwrap_or(ChannelTag::System),
                    status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Error),
                    detail: row.get(4)?,
                    created_at: parse_ts(&created_at),
                })
            })
            .map_err(|e| RemailerError::store(format!("List logs: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RemailerError::store(format!("List logs: {e}")))
    }
}

const MESSAGE_COLUMNS: &str = "id, name, subject, body, telegram_text, email_to, \
                               telegram_chat_id, is_active, created_by, created_at";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let created_at: String = row.get(9)?;
    Ok(Message {
        id: row.get(0)?,
        name: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        telegram_text: row.get(4)?,
        email_to: row.get(5)?,
        telegram_chat_id: row.get(6)?,
        is_active: row.get::<_, i32>(7)? != 0,
        created_by: row.get(8)?,
        created_at: parse_ts(&created_at),
    })
}

const SCHEDULE_COLUMNS: &str = "id, message_id, cron, start_at, end_at, interval_seconds, \
                                max_per_minute, last_run_at, is_paused, created_at";

fn schedule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let start_at: Option<String> = row.get(3)?;
    let end_at: Option<String> = row.get(4)?;
    let last_run_at: Option<String> = row.get(7)?;
    let created_at: String = row.get(9)?;
    Ok(Schedule {
        id: row.get(0)?,
        message_id: row.get(1)?,
        cron: row.get(2)?,
        start_at: start_at.as_deref().map(parse_ts),
        end_at: end_at.as_deref().map(parse_ts),
        interval_seconds: row.get(5)?,
        max_per_minute: row.get(6)?,
        last_run_at: last_run_at.as_deref().map(parse_ts),
        is_paused: row.get::<_, i32>(8)? != 0,
        created_at: parse_ts(&created_at),
    })
}

impl ScheduleStore for MailerDb {
    fn list_with_messages(&self) -> Result<Vec<(Schedule, Message)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.message_id, s.cron, s.start_at, s.end_at, s.interval_seconds,
                        s.max_per_minute, s.last_run_at, s.is_paused, s.created_at,
                        m.id, m.name, m.subject, m.body, m.telegram_text, m.email_to,
                        m.telegram_chat_id, m.is_active, m.created_by, m.created_at
                 FROM schedules s JOIN messages m ON m.id = s.message_id
                 ORDER BY s.id",
            )
            .map_err(|e| RemailerError::store(format!("List schedules: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                let schedule = schedule_from_row(row)?;
                let m_created: String = row.get(19)?;
                let message = Message {
                    id: row.get(10)?,
                    name: row.get(11)?,
                    subject: row.get(12)?,
                    body: row.get(13)?,
                    telegram_text: row.get(14)?,
                    email_to: row.get(15)?,
                    telegram_chat_id: row.get(16)?,
                    is_active: row.get::<_, i32>(17)? != 0,
                    created_by: row.get(18)?,
                    created_at: parse_ts(&m_created),
                };
                Ok((schedule, message))
            })
            .map_err(|e| RemailerError::store(format!("List schedules: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RemailerError::store(format!("List schedules: {e}")))
    }

    fn save_last_run(&self, schedule_id: i64, at: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE schedules SET last_run_at = ?1 WHERE id = ?2",
                rusqlite::params![ts(at), schedule_id],
            )
            .map_err(|e| RemailerError::store(format!("Save last run: {e}")))?;
        if changed == 0 {
            return Err(RemailerError::ScheduleNotFound(schedule_id));
        }
        Ok(())
    }
}

impl LogStore for MailerDb {
    fn append_log(
        &self,
        schedule_id: i64,
        channel: ChannelTag,
        status: DeliveryStatus,
        detail: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO delivery_logs (schedule_id, channel, status, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![schedule_id, channel.as_str(), status.as_str(), detail, ts(at)],
            )
            .map_err(|e| RemailerError::store(format!("Append log: {e}")))?;
        Ok(())
    }

    fn count_logs_since(&self, schedule_id: i64, since: DateTime<Utc>) -> Result<u32> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM delivery_logs
                 WHERE schedule_id = ?1 AND created_at >= ?2",
                rusqlite::params![schedule_id, ts(since)],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u32)
            .map_err(|e| RemailerError::store(format!("Count logs: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn seed_message(db: &MailerDb) -> Message {
        db.create_message(&NewMessage {
            name: "digest".into(),
            body: "hello".into(),
            email_to: Some("ops@example.com".into()),
            ..Default::default()
        })
        .unwrap()
    }

    fn seed_schedule(db: &MailerDb, message_id: i64) -> Schedule {
        db.create_schedule(&NewSchedule {
            message_id,
            cron: "*/5 * * * *".into(),
            start_at: None,
            end_at: None,
            interval_seconds: 60,
            max_per_minute: 30,
        })
        .unwrap()
    }

    #[test]
    fn test_message_round_trip() {
        let db = MailerDb::open_in_memory().unwrap();
        let created = seed_message(&db);
        let loaded = db.get_message(created.id).unwrap();
        assert_eq!(loaded.name, "digest");
        assert_eq!(loaded.email_to.as_deref(), Some("ops@example.com"));
        assert!(loaded.is_active);
    }

    #[test]
    fn test_schedule_round_trip_and_last_run() {
        let db = MailerDb::open_in_memory().unwrap();
        let message = seed_message(&db);
        let schedule = seed_schedule(&db, message.id);
        assert_eq!(db.get_schedule(schedule.id).unwrap().last_run_at, None);

        let at = Utc.with_ymd_and_hms(2026, 8, 30, 10, 5, 0).unwrap();
        db.save_last_run(schedule.id, at).unwrap();
        assert_eq!(db.get_schedule(schedule.id).unwrap().last_run_at, Some(at));
    }

    #[test]
    fn test_schedule_validation() {
        let db = MailerDb::open_in_memory().unwrap();
        let message = seed_message(&db);
        let base = NewSchedule {
            message_id: message.id,
            cron: "*/5 * * * *".into(),
            start_at: None,
            end_at: None,
            interval_seconds: 60,
            max_per_minute: 30,
        };

        let bad_cron = NewSchedule {
            cron: "not cron".into(),
            ..base.clone()
        };
        assert!(matches!(
            db.create_schedule(&bad_cron).unwrap_err(),
            RemailerError::InvalidExpression { .. }
        ));

        let low_interval = NewSchedule {
            interval_seconds: 5,
            ..base.clone()
        };
        assert!(matches!(
            db.create_schedule(&low_interval).unwrap_err(),
            RemailerError::Validation(_)
        ));

        let zero_cap = NewSchedule {
            max_per_minute: 0,
            ..base.clone()
        };
        assert!(matches!(
            db.create_schedule(&zero_cap).unwrap_err(),
            RemailerError::Validation(_)
        ));

        let orphan = NewSchedule {
            message_id: 999,
            ..base
        };
        assert!(matches!(
            db.create_schedule(&orphan).unwrap_err(),
            RemailerError::MessageNotFound(999)
        ));
    }

    #[test]
    fn test_count_logs_window() {
        let db = MailerDb::open_in_memory().unwrap();
        let message = seed_message(&db);
        let schedule = seed_schedule(&db, message.id);

        let now = Utc.with_ymd_and_hms(2026, 8, 30, 10, 5, 0).unwrap();
        for offset in [-120i64, -61, -60, -30, 0] {
            db.append_log(
                schedule.id,
                ChannelTag::Email,
                DeliveryStatus::Sent,
                "",
                now + Duration::seconds(offset),
            )
            .unwrap();
        }

        // Window is inclusive of its start: -60, -30, and 0 count.
        let count = db
            .count_logs_since(schedule.id, now - Duration::seconds(60))
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_cascade_delete() {
        let db = MailerDb::open_in_memory().unwrap();
        let message = seed_message(&db);
        let schedule = seed_schedule(&db, message.id);
        db.append_log(
            schedule.id,
            ChannelTag::Email,
            DeliveryStatus::Sent,
            "",
            Utc::now(),
        )
        .unwrap();

        db.delete_message(message.id).unwrap();
        assert!(matches!(
            db.get_schedule(schedule.id).unwrap_err(),
            RemailerError::ScheduleNotFound(_)
        ));
        assert!(db.recent_logs(schedule.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_list_with_messages_join() {
        let db = MailerDb::open_in_memory().unwrap();
        let message = seed_message(&db);
        seed_schedule(&db, message.id);
        seed_schedule(&db, message.id);

        let pairs = db.list_with_messages().unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|(s, m)| s.message_id == m.id));
    }

    #[test]
    fn test_pause_and_resume() {
        let db = MailerDb::open_in_memory().unwrap();
        let message = seed_message(&db);
        let schedule = seed_schedule(&db, message.id);

        db.set_paused(schedule.id, true).unwrap();
        assert!(db.get_schedule(schedule.id).unwrap().is_paused);
        db.set_paused(schedule.id, false).unwrap();
        assert!(!db.get_schedule(schedule.id).unwrap().is_paused);
    }
}
