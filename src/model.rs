use std::collections::HashMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::time::minutes_to_time;

/// Unix milliseconds. Used for creation and lock timestamps.
pub type Ms = i64;

/// Minutes: either an offset into a day (0..1440) or a duration.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 1440;

/// Absolute minute at which `date` begins.
pub fn day_origin(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce()) * i64::from(MINUTES_PER_DAY)
}

/// Half-open interval `[start, end)` in absolute minutes.
///
/// Absolute time makes midnight spillover fall out naturally: a reservation
/// dated `D` that ends at minute 1500 covers the first hour of `D + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: i64,
    pub end: i64,
}

impl Span {
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span of a booking that starts `start` minutes into `date`.
    pub fn on_day(date: NaiveDate, start: Minute, duration: Minute) -> Self {
        let from = day_origin(date) + i64::from(start);
        Self::new(from, from + i64::from(duration))
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The atomicity boundary for admission: `(date, resource, start)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub resource_id: String,
    pub start: Minute,
}

impl SlotKey {
    pub fn new(date: NaiveDate, resource_id: impl Into<String>, start: Minute) -> Self {
        Self {
            date,
            resource_id: resource_id.into(),
            start,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.date.format("%Y-%m-%d"),
            self.resource_id,
            minutes_to_time(self.start)
        )
    }
}

/// Lock record guarding one slot key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLock {
    pub reservation_id: Ulid,
    pub locked_at: Ms,
}

impl SlotLock {
    /// A lock is stale once it is at least `expiration` old.
    pub fn is_stale(&self, now: Ms, expiration: Ms) -> bool {
        now - self.locked_at >= expiration
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: String,
    pub date: NaiveDate,
    /// Minute of day.
    pub start: Minute,
    pub duration: Minute,
    /// Canonical (title-cased) name; compared case-insensitively.
    pub user_name: String,
    /// Ten digits, no separators.
    pub phone_number: String,
    /// PHC string; `None` for reservations that were made without a PIN.
    pub pin_hash: Option<String>,
    pub created_at: Ms,
}

impl Reservation {
    /// End as minute offset from the start of `date`. May exceed 1440.
    pub fn end(&self) -> Minute {
        self.start + self.duration
    }

    pub fn span(&self) -> Span {
        Span::on_day(self.date, self.start, self.duration)
    }

    pub fn spills_over(&self) -> bool {
        self.end() > MINUTES_PER_DAY
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.date, self.resource_id.clone(), self.start)
    }

    pub fn info(&self) -> ReservationInfo {
        ReservationInfo {
            id: self.id,
            resource_id: self.resource_id.clone(),
            date: self.date,
            start_time: minutes_to_time(self.start),
            end_time: minutes_to_time(self.end()),
            ends_next_day: self.spills_over(),
            duration_minutes: self.duration,
            user_name: self.user_name.clone(),
            phone_number: self.phone_number.clone(),
            created_at: self.created_at,
        }
    }
}

/// A reservation before the store has assigned `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub resource_id: String,
    pub date: NaiveDate,
    pub start: Minute,
    pub duration: Minute,
    pub user_name: String,
    pub phone_number: String,
    pub pin_hash: Option<String>,
}

impl NewReservation {
    pub fn into_reservation(self, id: Ulid, created_at: Ms) -> Reservation {
        Reservation {
            id,
            resource_id: self.resource_id,
            date: self.date,
            start: self.start,
            duration: self.duration,
            user_name: self.user_name,
            phone_number: self.phone_number,
            pin_hash: self.pin_hash,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub maintenance: bool,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: String,
    pub name: String,
    /// Sorted by `(date, start)`.
    pub reservations: Vec<Reservation>,
    /// Keyed by `(date, start)`; the resource is implied.
    pub locks: HashMap<(NaiveDate, Minute), SlotLock>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            reservations: Vec::new(),
            locks: HashMap::new(),
        }
    }

    /// Insert maintaining `(date, start)` order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let key = (reservation.date, reservation.start);
        let pos = self
            .reservations
            .partition_point(|r| (r.date, r.start) <= key);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations dated within `[from, to]`, in order.
    pub fn on_dates(&self, from: NaiveDate, to: NaiveDate) -> &[Reservation] {
        let lo = self.reservations.partition_point(|r| r.date < from);
        let hi = self.reservations.partition_point(|r| r.date <= to);
        if lo >= hi {
            return &[];
        }
        &self.reservations[lo..hi]
    }

    pub fn lock(&self, date: NaiveDate, start: Minute) -> Option<&SlotLock> {
        self.locks.get(&(date, start))
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Lock and reservation are written as one record.
    ReservationCreated {
        reservation: Reservation,
        locked_at: Ms,
    },
    ReservationDeleted {
        id: Ulid,
        resource_id: String,
    },
    LockReleased {
        key: SlotKey,
    },
    MaintenanceChanged {
        enabled: bool,
    },
}

impl Event {
    /// Resource the event applies to; `None` for global settings.
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Event::ReservationCreated { reservation, .. } => Some(&reservation.resource_id),
            Event::ReservationDeleted { resource_id, .. } => Some(resource_id),
            Event::LockReleased { key } => Some(&key.resource_id),
            Event::MaintenanceChanged { .. } => None,
        }
    }
}

// ── Public views ─────────────────────────────────────────────────

/// What callers see of a reservation. Never carries the PIN hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub resource_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub ends_next_day: bool,
    pub duration_minutes: Minute,
    pub user_name: String,
    pub phone_number: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub id: String,
    pub name: String,
}

/// Whether a resource is running right now, and for how much longer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub id: String,
    pub name: String,
    pub busy: bool,
    /// Present while busy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_minutes: Option<i64>,
}

/// Position in the newest-first history listing. History pages hold the
/// reservations strictly before the cursor in `(date, start, resource)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCursor {
    pub date: NaiveDate,
    pub start: Minute,
    pub resource_id: String,
}

impl HistoryCursor {
    /// Ahead of everything dated `date` or later.
    pub fn start_of(date: NaiveDate) -> Self {
        Self {
            date,
            start: 0,
            resource_id: String::new(),
        }
    }

    /// The position of `r` itself; the next page starts just past it.
    pub fn at(r: &Reservation) -> Self {
        Self {
            date: r.date,
            start: r.start,
            resource_id: r.resource_id.clone(),
        }
    }

    pub fn is_after(&self, r: &Reservation) -> bool {
        (r.date, r.start, r.resource_id.as_str()) < (self.date, self.start, self.resource_id.as_str())
    }

    /// `YYYY-MM-DD` alone, or `YYYY-MM-DD_HH:MM_resource` as printed by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let mut parts = s.splitn(3, '_');
        let date = crate::time::parse_date(parts.next()?)?;
        match (parts.next(), parts.next()) {
            (None, None) => Some(Self::start_of(date)),
            (Some(time), Some(resource_id)) if !resource_id.is_empty() => Some(Self {
                date,
                start: crate::time::parse_time(time)?,
                resource_id: resource_id.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for HistoryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.date.format("%Y-%m-%d"),
            minutes_to_time(self.start),
            self.resource_id
        )
    }
}

/// One page of history plus where the next one starts. `next` is absent on
/// the last page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub count: usize,
    pub reservations: Vec<ReservationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub today: usize,
    pub upcoming: usize,
}
