//! Slot admissibility against committed reservations.
//!
//! Pure functions over a candidate set; the caller decides where the set comes
//! from (a store snapshot for the advisory pre-check, or the locked resource
//! state at commit time). Intervals are half-open, so back-to-back bookings
//! never conflict.

use chrono::NaiveDate;

use crate::model::{Minute, Reservation, Span};
use crate::time::add_days;

/// Same-day overlap or spillover from the previous day.
///
/// The request's own spill into `date + 1` is not examined here; see
/// [`find_next_day_conflict`].
pub fn find_conflict<'a>(
    resource_id: &str,
    date: NaiveDate,
    start: Minute,
    duration: Minute,
    existing: &'a [Reservation],
) -> Option<&'a Reservation> {
    if duration == 0 {
        return None;
    }
    let requested = Span::on_day(date, start, duration);
    let previous = add_days(date, -1);

    let same_day = on_resource(existing, resource_id)
        .filter(|b| b.date == date)
        .find(|b| b.span().overlaps(&requested));
    if same_day.is_some() {
        return same_day;
    }

    // A previous-day booking occupies [0, end - 1440) of `date`.
    on_resource(existing, resource_id)
        .filter(|b| b.date == previous && b.spills_over())
        .find(|b| b.span().overlaps(&requested))
}

/// The request spills past midnight into a booking already made for `date + 1`.
pub fn find_next_day_conflict<'a>(
    resource_id: &str,
    date: NaiveDate,
    start: Minute,
    duration: Minute,
    existing: &'a [Reservation],
) -> Option<&'a Reservation> {
    if duration == 0 {
        return None;
    }
    let requested = Span::on_day(date, start, duration);
    let next = add_days(date, 1);
    on_resource(existing, resource_id)
        .filter(|b| b.date == next)
        .find(|b| b.span().overlaps(&requested))
}

/// Both directions. Needs the reservations of `date - 1 ..= date + 1`.
pub fn find_timeline_conflict<'a>(
    resource_id: &str,
    date: NaiveDate,
    start: Minute,
    duration: Minute,
    existing: &'a [Reservation],
) -> Option<&'a Reservation> {
    find_conflict(resource_id, date, start, duration, existing)
        .or_else(|| find_next_day_conflict(resource_id, date, start, duration, existing))
}

/// `true` iff the duration is positive and [`find_conflict`] finds nothing.
pub fn is_slot_free(
    resource_id: &str,
    date: NaiveDate,
    start: Minute,
    duration: Minute,
    existing: &[Reservation],
) -> bool {
    duration > 0 && find_conflict(resource_id, date, start, duration, existing).is_none()
}

fn on_resource<'a, 'r>(
    existing: &'a [Reservation],
    resource_id: &'r str,
) -> impl Iterator<Item = &'a Reservation> {
    existing
        .iter()
        .filter(move |b| b.resource_id == resource_id && b.duration > 0)
}
