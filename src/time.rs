//! Wall-clock helpers: `HH:MM` <-> minute-of-day, calendar arithmetic, clocks.

use chrono::{Days, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::model::{MINUTES_PER_DAY, Minute, Ms, day_origin};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Strict `H:MM` / `HH:MM` parser. `None` for anything outside 00:00..=23:59.
pub fn parse_time(hhmm: &str) -> Option<Minute> {
    let (h, m) = hhmm.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    if !h.bytes().all(|b| b.is_ascii_digit()) || !m.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let h: Minute = h.parse().ok()?;
    let m: Minute = m.parse().ok()?;
    if h >= 24 || m >= 60 {
        return None;
    }
    Some(h * 60 + m)
}

/// Permissive variant: empty or malformed input maps to 0.
///
/// Callers that need to tell "00:00" from garbage must use [`parse_time`].
pub fn time_to_minutes(hhmm: &str) -> Minute {
    parse_time(hhmm).unwrap_or(0)
}

/// Zero-padded `HH:MM`. Values past midnight are shifted back one day;
/// labelling them as "next day" is up to the caller.
pub fn minutes_to_time(mins: Minute) -> String {
    let mins = if mins >= MINUTES_PER_DAY {
        mins - MINUTES_PER_DAY
    } else {
        mins
    };
    format!("{:02}:{:02}", mins / 60, mins % 60)
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    // chrono accepts unpadded fields; the wire format does not.
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Calendar-correct day shift. Saturates at the ends of the representable range.
pub fn add_days(date: NaiveDate, n: i64) -> NaiveDate {
    let days = Days::new(n.unsigned_abs());
    if n >= 0 {
        date.checked_add_days(days).unwrap_or(NaiveDate::MAX)
    } else {
        date.checked_sub_days(days).unwrap_or(NaiveDate::MIN)
    }
}

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Source of the current local time for quota evaluation and live status.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// The system's local calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    /// Midnight of `date`.
    pub fn on(date: NaiveDate) -> Self {
        Self(date.and_time(NaiveTime::MIN))
    }

    /// `minute` minutes into `date`.
    pub fn at(date: NaiveDate, minute: Minute) -> Self {
        Self(Self::on(date).0 + chrono::Duration::minutes(i64::from(minute)))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Absolute minute of a local timestamp, on the same axis as [`crate::model::Span`].
pub fn absolute_minute(at: NaiveDateTime) -> i64 {
    day_origin(at.date()) + i64::from(at.time().num_seconds_from_midnight() / 60)
}
