//! Schedule due-check: combines pause flag, message activity, activity
//! window, interval throttle, cron match, and the sliding-window rate limit
//! into a single "due now" decision.

use chrono::{DateTime, Duration, Utc};

use remailer_core::error::Result;
use remailer_core::traits::LogStore;
use remailer_core::types::{Message, Schedule, RATE_LIMIT_WINDOW_SECONDS};

use crate::cron::CronExpr;

/// Whether `schedule` is eligible for dispatch at `now`. Pure apart from the
/// injected log count. Checks short-circuit cheapest-first; the log-store
/// query runs only when everything else already passed.
///
/// Cron matching is minute-granular, so an expression stays "matched" for a
/// whole minute; the interval throttle is what prevents duplicate dispatch
/// when the tick period is shorter than 60s.
pub fn is_due<S: LogStore + ?Sized>(
    schedule: &Schedule,
    message: &Message,
    now: DateTime<Utc>,
    logs: &S,
) -> Result<bool> {
    if schedule.is_paused || !message.is_active {
        return Ok(false);
    }
    if schedule.start_at.is_some_and(|start| now < start) {
        return Ok(false);
    }
    if schedule.end_at.is_some_and(|end| now > end) {
        return Ok(false);
    }
    if let Some(last) = schedule.last_run_at
        && (now - last).num_seconds() < schedule.interval_seconds as i64
    {
        return Ok(false);
    }
    // Expressions are validated at schedule creation; a parse failure here
    // means corrupt stored data and surfaces as an error, not a skip.
    let expr = CronExpr::parse(&schedule.cron)?;
    if !expr.matches(now.naive_utc()) {
        return Ok(false);
    }
    let window_start = now - Duration::seconds(RATE_LIMIT_WINDOW_SECONDS);
    Ok(logs.count_logs_since(schedule.id, window_start)? < schedule.max_per_minute)
}
