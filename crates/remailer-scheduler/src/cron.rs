//! Five-field cron expression evaluator.
//! Grammar: "MIN HOUR DOM MON DOW" with `*`, `N`, `*/S`, `A-B`, `A-B/S`, and
//! comma lists. Day-of-week accepts 0-7 (0 and 7 are both Sunday).
//!
//! Expressions are validated when a schedule is created; evaluation assumes a
//! pre-validated expression and works at minute granularity (seconds are
//! ignored). Matching both day fields follows standard cron: when day-of-month
//! and day-of-week are both restricted, a date matches if either matches.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use remailer_core::error::{RemailerError, Result};

/// How far `next_after` scans before concluding the expression never fires
/// (covers Feb 29 and any month/day combination that does occur).
const SCAN_LIMIT_DAYS: i64 = 4 * 366;

/// A parsed cron expression. Each field is a bitmask of permitted values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u64,
    dom: u64,
    months: u64,
    dow: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse and validate a cron expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let fail = |reason: &str| RemailerError::invalid_expression(expr, reason);

        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(fail("need 5 fields: MIN HOUR DOM MON DOW"));
        }

        let minutes = parse_field(parts[0], 0, 59).map_err(|r| fail(&r))?;
        let hours = parse_field(parts[1], 0, 23).map_err(|r| fail(&r))?;
        let dom = parse_field(parts[2], 1, 31).map_err(|r| fail(&r))?;
        let months = parse_field(parts[3], 1, 12).map_err(|r| fail(&r))?;
        let mut dow = parse_field(parts[4], 0, 7).map_err(|r| fail(&r))?;
        // Fold 7 (Sunday) onto 0.
        if dow & (1 << 7) != 0 {
            dow = (dow & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes,
            hours,
            dom,
            months,
            dow,
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }

    /// Whether the expression matches the given instant. Minute granularity;
    /// seconds and below are ignored.
    pub fn matches(&self, t: NaiveDateTime) -> bool {
        bit(self.minutes, t.minute())
            && bit(self.hours, t.hour())
            && bit(self.months, t.date().month())
            && self.day_matches(t.date())
    }

    /// The next matching instant strictly after `t` (progress guarantee:
    /// never returns `t` itself). `None` only for field combinations that
    /// never occur within the scan horizon.
    pub fn next_after(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut candidate = t
            .with_second(0)
            .and_then(|c| c.with_nanosecond(0))
            .unwrap_or(t)
            + Duration::minutes(1);
        let limit = t + Duration::days(SCAN_LIMIT_DAYS);

        while candidate <= limit {
            let date = candidate.date();
            if !bit(self.months, date.month()) || !self.day_matches(date) {
                // Skip to the next midnight.
                candidate = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, candidate.hour()) {
                candidate = candidate.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if bit(self.minutes, candidate.minute()) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom_ok = bit(self.dom, date.day());
        let dow_ok = bit(self.dow, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }
}

fn bit(mask: u64, value: u32) -> bool {
    value < 64 && mask & (1 << value) != 0
}

/// Parse one cron field into a bitmask of permitted values.
fn parse_field(field: &str, min: u32, max: u32) -> std::result::Result<u64, String> {
    let mut mask = 0u64;
    for item in field.split(',') {
        mask |= parse_item(item, min, max)?;
    }
    Ok(mask)
}

fn parse_item(item: &str, min: u32, max: u32) -> std::result::Result<u64, String> {
    let (range, step) = match item.split_once('/') {
        Some((r, s)) => {
            let step: u32 = s
                .parse()
                .map_err(|_| format!("bad step '{s}' in '{item}'"))?;
            if step == 0 {
                return Err(format!("zero step in '{item}'"));
            }
            (r, step)
        }
        None => (item, 1),
    };

    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        let lo = parse_value(a, min, max)?;
        let hi = parse_value(b, min, max)?;
        if lo > hi {
            return Err(format!("inverted range '{range}'"));
        }
        (lo, hi)
    } else {
        let v = parse_value(range, min, max)?;
        (v, v)
    };

    let mut mask = 0u64;
    let mut v = lo;
    while v <= hi {
        mask |= 1 << v;
        v += step;
    }
    Ok(mask)
}

fn parse_value(s: &str, min: u32, max: u32) -> std::result::Result<u32, String> {
    let v: u32 = s.parse().map_err(|_| format!("bad value '{s}'"))?;
    if v < min || v > max {
        return Err(format!("value {v} out of range {min}-{max}"));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_every_minute_matches() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        assert!(expr.matches(at(2026, 8, 30, 10, 30, 0)));
        // Seconds are ignored.
        assert!(expr.matches(at(2026, 8, 30, 10, 30, 59)));
    }

    #[test]
    fn test_every_five_minutes() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        assert!(expr.matches(at(2026, 8, 30, 10, 0, 0)));
        assert!(expr.matches(at(2026, 8, 30, 10, 55, 0)));
        assert!(!expr.matches(at(2026, 8, 30, 10, 3, 0)));
    }

    #[test]
    fn test_specific_time() {
        let expr = CronExpr::parse("0 8 * * *").unwrap();
        assert!(expr.matches(at(2026, 8, 30, 8, 0, 0)));
        assert!(!expr.matches(at(2026, 8, 30, 8, 1, 0)));
        assert!(!expr.matches(at(2026, 8, 30, 9, 0, 0)));
    }

    #[test]
    fn test_ranges_and_lists() {
        let expr = CronExpr::parse("0,30 9-17 * * 1-5").unwrap();
        // 2026-08-31 is a Monday.
        assert!(expr.matches(at(2026, 8, 31, 9, 30, 0)));
        assert!(!expr.matches(at(2026, 8, 31, 8, 30, 0)));
        // 2026-08-30 is a Sunday.
        assert!(!expr.matches(at(2026, 8, 30, 9, 30, 0)));
    }

    #[test]
    fn test_dom_dow_union() {
        // Standard cron: both fields restricted -> either may match.
        let expr = CronExpr::parse("0 0 15 * 1").unwrap();
        assert!(expr.matches(at(2026, 8, 15, 0, 0, 0))); // Saturday the 15th
        assert!(expr.matches(at(2026, 8, 31, 0, 0, 0))); // Monday the 31st
        assert!(!expr.matches(at(2026, 8, 30, 0, 0, 0))); // Sunday the 30th
    }

    #[test]
    fn test_sunday_as_seven() {
        let expr = CronExpr::parse("0 0 * * 7").unwrap();
        assert!(expr.matches(at(2026, 8, 30, 0, 0, 0))); // Sunday
        assert!(!expr.matches(at(2026, 8, 31, 0, 0, 0)));
    }

    #[test]
    fn test_next_after_hourly() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let next = expr.next_after(at(2026, 2, 22, 10, 30, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 22, 11, 0, 0));
    }

    #[test]
    fn test_next_after_is_strictly_greater() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let t = at(2026, 8, 30, 10, 30, 0);
        assert_eq!(expr.next_after(t).unwrap(), at(2026, 8, 30, 10, 31, 0));

        // Even when `t` itself matches exactly.
        let expr = CronExpr::parse("30 10 * * *").unwrap();
        assert_eq!(expr.next_after(t).unwrap(), at(2026, 8, 31, 10, 30, 0));
    }

    #[test]
    fn test_next_after_crosses_month() {
        let expr = CronExpr::parse("0 8 1 * *").unwrap();
        let next = expr.next_after(at(2026, 8, 30, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 9, 1, 8, 0, 0));
    }

    #[test]
    fn test_next_after_leap_day() {
        let expr = CronExpr::parse("0 0 29 2 *").unwrap();
        let next = expr.next_after(at(2026, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2028, 2, 29, 0, 0, 0));
    }

    #[test]
    fn test_invalid_expressions() {
        for bad in [
            "bad",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5-2 * * * *",
            "a * * * *",
        ] {
            let err = CronExpr::parse(bad).unwrap_err();
            assert!(
                matches!(err, RemailerError::InvalidExpression { .. }),
                "expected InvalidExpression for {bad:?}"
            );
        }
    }
}
