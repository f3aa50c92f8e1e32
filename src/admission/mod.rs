//! Booking admission: validation, conflict pre-check, quota, atomic commit.
//!
//! The pre-check runs against a snapshot and only gives early feedback. The
//! store's `atomic_create` is what guarantees one winner per slot key; losing
//! that race is reported as an ordinary slot conflict.

mod error;
#[cfg(test)]
mod tests;
pub mod validate;

pub use error::{BookingError, DeleteError, QueryError, Remedy, SettingsError, ValidationError};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::engine::StoreError;
use crate::limits::MAX_HISTORY_LIMIT;
use crate::model::*;
use crate::observability::{BOOKING_DURATION_SECONDS, BOOKINGS_TOTAL, CANCELLATIONS_TOTAL};
use crate::overlap::{find_next_day_conflict, find_timeline_conflict, is_slot_free};
use crate::pin::{hash_pin_blocking, verify_pin_blocking};
use crate::quota::{can_user_book, same_user};
use crate::store::ReservationStore;
use crate::time::{Clock, absolute_minute, add_days, minutes_to_time, parse_time};

use validate::{check_date, check_resource, check_search_term, validate_booking};

/// Raw booking form, as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub user_name: String,
    pub phone_number: String,
    pub pin: Option<String>,
    pub resource_id: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub start_time: String,
    pub duration_minutes: Minute,
}

/// Who is asking. Admin authentication happens outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Public,
    Admin,
}

impl Caller {
    pub fn is_admin(self) -> bool {
        matches!(self, Caller::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    CheckingConflict,
    CheckingQuota,
    Committing,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::CheckingConflict => "checking_conflict",
            Stage::CheckingQuota => "checking_quota",
            Stage::Committing => "committing",
        }
    }
}

pub struct AdmissionController {
    store: Arc<dyn ReservationStore>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn ReservationStore>, config: Arc<Config>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn submit_booking(
        &self,
        request: BookingRequest,
        caller: Caller,
    ) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self.admit(request, caller).await;
        let outcome = match &result {
            Ok(_) => "committed",
            Err(e) => e.outcome(),
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(BOOKING_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn admit(
        &self,
        request: BookingRequest,
        caller: Caller,
    ) -> Result<Reservation, BookingError> {
        if !caller.is_admin() && self.store.settings().await?.maintenance {
            return Err(BookingError::Maintenance);
        }

        debug!(stage = Stage::Validating.as_str(), resource = %request.resource_id);
        let valid = validate_booking(&request, &self.config)?;
        let today = self.clock.today();
        // Admins may backfill past reservations.
        if !caller.is_admin() && valid.date < today {
            return Err(ValidationError::DateInPast(valid.date).into());
        }
        let key = SlotKey::new(valid.date, valid.resource_id.clone(), valid.start);

        debug!(stage = Stage::CheckingConflict.as_str(), key = %key);
        let window = self
            .store
            .query_range(
                Some(&valid.resource_id),
                add_days(valid.date, -1),
                add_days(valid.date, 1),
            )
            .await?;
        if let Some(existing) = find_timeline_conflict(
            &valid.resource_id,
            valid.date,
            valid.start,
            valid.duration,
            &window,
        ) {
            return Err(BookingError::SlotConflict {
                resource_id: valid.resource_id,
                date: valid.date,
                start: valid.start,
                conflicting: Some(existing.id),
            });
        }

        debug!(stage = Stage::CheckingQuota.as_str(), key = %key);
        let forward = self.store.query_range(None, today, NaiveDate::MAX).await?;
        if !can_user_book(&valid.user_name, &forward, self.config.booking_limit, today) {
            return Err(BookingError::QuotaExceeded {
                limit: self.config.booking_limit,
            });
        }

        debug!(stage = Stage::Committing.as_str(), key = %key);
        let pin_hash = match valid.pin {
            Some(pin) => Some(
                hash_pin_blocking(pin)
                    .await
                    .map_err(|e| BookingError::Internal(e.to_string()))?,
            ),
            None => None,
        };
        let new = NewReservation {
            resource_id: valid.resource_id,
            date: valid.date,
            start: valid.start,
            duration: valid.duration,
            user_name: valid.user_name,
            phone_number: valid.phone_number,
            pin_hash,
        };
        self.commit(key, new).await
    }

    /// The commit runs on its own task so that a caller who stops waiting
    /// does not cut it off halfway; it lands or fails on its own.
    async fn commit(&self, key: SlotKey, new: NewReservation) -> Result<Reservation, BookingError> {
        let store = self.store.clone();
        let task_key = key.clone();
        let commit = tokio::spawn(async move { store.atomic_create(task_key, new).await });
        let timeout = Duration::from_millis(self.config.commit_timeout_ms);

        match tokio::time::timeout(timeout, commit).await {
            Err(_) => {
                warn!(key = %key, "commit timed out; outcome unknown");
                Err(BookingError::OutcomeUnknown)
            }
            Ok(Err(join)) => Err(BookingError::Internal(join.to_string())),
            Ok(Ok(Err(e))) if e.is_slot_contention() => {
                info!(key = %key, "lost the slot at commit: {e}");
                let conflicting = match e {
                    StoreError::Conflict(id) => Some(id),
                    _ => None,
                };
                Err(BookingError::SlotConflict {
                    resource_id: key.resource_id,
                    date: key.date,
                    start: key.start,
                    conflicting,
                })
            }
            Ok(Ok(Err(e))) => Err(BookingError::Store(e)),
            Ok(Ok(Ok(reservation))) => {
                info!(
                    id = %reservation.id,
                    key = %key,
                    duration = reservation.duration,
                    "reservation committed"
                );
                Ok(reservation)
            }
        }
    }

    /// Read-only pre-check for interactive feedback. Same rule as the
    /// booking path, including a spill into the next day's bookings.
    pub async fn is_slot_free(
        &self,
        resource_id: &str,
        date: &str,
        start_time: &str,
        duration_minutes: Minute,
    ) -> Result<bool, QueryError> {
        let resource_id = check_resource(resource_id, &self.config)?;
        let date = check_date(date)?;
        let start = parse_time(start_time)
            .ok_or_else(|| ValidationError::InvalidTime(start_time.to_string()))?;
        let window = self
            .store
            .query_range(Some(&resource_id), add_days(date, -1), add_days(date, 1))
            .await?;
        Ok(
            is_slot_free(&resource_id, date, start, duration_minutes, &window)
                && find_next_day_conflict(&resource_id, date, start, duration_minutes, &window)
                    .is_none(),
        )
    }

    /// Reservations dated `from..=to`, optionally for one machine.
    pub async fn list_reservations(
        &self,
        resource_id: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<Vec<ReservationInfo>, QueryError> {
        let resource_id = resource_id
            .map(|id| check_resource(id, &self.config))
            .transpose()?;
        let from = check_date(from)?;
        let to = check_date(to)?;
        let found = self
            .store
            .query_range(resource_id.as_deref(), from, to)
            .await?;
        Ok(found.iter().map(Reservation::info).collect())
    }

    /// Admins delete anything. Everyone else needs the reservation's PIN;
    /// reservations stored without one are admin-only.
    pub async fn delete_reservation(
        &self,
        id: Ulid,
        pin: Option<&str>,
        caller: Caller,
    ) -> Result<ReservationInfo, DeleteError> {
        let result = self.authorize_and_delete(id, pin, caller).await;
        let outcome = match &result {
            Ok(_) => "deleted",
            Err(e) => e.outcome(),
        };
        metrics::counter!(CANCELLATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn authorize_and_delete(
        &self,
        id: Ulid,
        pin: Option<&str>,
        caller: Caller,
    ) -> Result<ReservationInfo, DeleteError> {
        let reservation = self
            .store
            .get(id)
            .await?
            .ok_or(DeleteError::NotFound(id))?;

        if !caller.is_admin() {
            let (Some(hash), Some(pin)) = (reservation.pin_hash.clone(), pin) else {
                return Err(DeleteError::Unauthorized);
            };
            if !verify_pin_blocking(pin.to_string(), hash).await {
                info!(id = %id, "cancellation refused: wrong PIN");
                return Err(DeleteError::Unauthorized);
            }
        }

        let removed = self.store.delete(id).await?;
        info!(id = %id, key = %removed.slot_key(), admin = caller.is_admin(), "reservation cancelled");
        Ok(removed.info())
    }

    pub async fn get_maintenance_mode(&self) -> Result<bool, StoreError> {
        Ok(self.store.settings().await?.maintenance)
    }

    pub async fn set_maintenance_mode(&self, enabled: bool, caller: Caller) -> Result<(), SettingsError> {
        if !caller.is_admin() {
            return Err(SettingsError::Forbidden);
        }
        self.store.set_maintenance(enabled).await?;
        Ok(())
    }

    /// Past reservations, newest first, one page at a time. `before` is a
    /// date or the `next` cursor of the previous page; it defaults to today.
    pub async fn history(
        &self,
        before: Option<&str>,
        limit: Option<usize>,
        caller: Caller,
    ) -> Result<HistoryPage, QueryError> {
        if !caller.is_admin() {
            return Err(QueryError::Forbidden);
        }
        let before = match before {
            Some(raw) => HistoryCursor::parse(raw)
                .ok_or_else(|| ValidationError::InvalidCursor(raw.to_string()))?,
            None => HistoryCursor::start_of(self.clock.today()),
        };
        let limit = limit
            .unwrap_or(self.config.history_limit)
            .clamp(1, MAX_HISTORY_LIMIT);
        let past = self.store.history(&before, limit).await?;
        let next = past
            .last()
            .filter(|_| past.len() == limit)
            .map(|last| HistoryCursor::at(last).to_string());
        Ok(HistoryPage {
            count: past.len(),
            reservations: past.iter().map(Reservation::info).collect(),
            next,
        })
    }

    /// A user's reservations from today on.
    pub async fn user_reservations(&self, user_name: &str) -> Result<Vec<ReservationInfo>, QueryError> {
        let today = self.clock.today();
        let user = validate::canonical_name(user_name);
        let forward = self.store.query_range(None, today, NaiveDate::MAX).await?;
        Ok(forward
            .iter()
            .filter(|r| same_user(&r.user_name, &user))
            .map(Reservation::info)
            .collect())
    }

    /// Admin search: case-insensitive substring of name or phone, optionally
    /// on one date. Covers upcoming reservations.
    pub async fn search_reservations(
        &self,
        term: &str,
        date: Option<&str>,
        caller: Caller,
    ) -> Result<Vec<ReservationInfo>, QueryError> {
        if !caller.is_admin() {
            return Err(QueryError::Forbidden);
        }
        let needle = check_search_term(term)?;
        let (from, to) = match date {
            Some(raw) => {
                let d = check_date(raw)?;
                (d, d)
            }
            None => (self.clock.today(), NaiveDate::MAX),
        };
        let found = self.store.query_range(None, from, to).await?;
        Ok(found
            .iter()
            .filter(|r| {
                r.user_name.to_lowercase().contains(&needle) || r.phone_number.contains(&needle)
            })
            .map(Reservation::info)
            .collect())
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, QueryError> {
        let today = self.clock.today();
        let forward = self.store.query_range(None, today, NaiveDate::MAX).await?;
        Ok(DashboardStats {
            today: forward.iter().filter(|r| r.date == today).count(),
            upcoming: forward.len(),
        })
    }

    pub fn resources(&self) -> Vec<ResourceInfo> {
        self.store.resources()
    }

    /// Which machines are running right now, including yesterday's bookings
    /// that run past midnight.
    pub async fn resource_status(&self) -> Result<Vec<ResourceStatus>, QueryError> {
        let now = self.clock.now();
        let today = now.date();
        let at = absolute_minute(now);
        let current = self
            .store
            .query_range(None, add_days(today, -1), today)
            .await?;

        Ok(self
            .store
            .resources()
            .into_iter()
            .map(|resource| {
                let running = current.iter().find(|r| {
                    let span = r.span();
                    r.resource_id == resource.id && span.start <= at && at < span.end
                });
                match running {
                    Some(r) => ResourceStatus {
                        id: resource.id,
                        name: resource.name,
                        busy: true,
                        until: Some(minutes_to_time(r.end())),
                        remaining_minutes: Some(r.span().end - at),
                    },
                    None => ResourceStatus {
                        id: resource.id,
                        name: resource.name,
                        busy: false,
                        until: None,
                        remaining_minutes: None,
                    },
                }
            })
            .collect())
    }
}
