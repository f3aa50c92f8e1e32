//! Per-user booking quota.
//!
//! Point-in-time check only: two sessions of the same user racing each other
//! can end up one over the limit. Slot exclusivity is what the atomic commit
//! protects; the quota is policy.

use chrono::NaiveDate;

use crate::model::Reservation;

/// Case-insensitive, whole-string identity match.
pub fn same_user(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Reservations held by `user_name` dated `today` or later.
pub fn active_count(user_name: &str, existing: &[Reservation], today: NaiveDate) -> usize {
    existing
        .iter()
        .filter(|r| r.date >= today && same_user(&r.user_name, user_name))
        .count()
}

pub fn can_user_book(
    user_name: &str,
    existing: &[Reservation],
    limit: usize,
    today: NaiveDate,
) -> bool {
    active_count(user_name, existing, today) < limit
}
