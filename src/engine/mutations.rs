use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{LOCK_RELEASE_FAILURES_TOTAL, STALE_LOCKS_RECLAIMED_TOTAL};
use crate::overlap::find_timeline_conflict;
use crate::time::{add_days, now_ms};

use super::{Engine, StoreError, WalCommand};

fn validate_new(key: &SlotKey, new: &NewReservation) -> Result<(), StoreError> {
    if key.resource_id != new.resource_id || key.date != new.date || key.start != new.start {
        return Err(StoreError::KeyMismatch(key.clone()));
    }
    if new.start >= MINUTES_PER_DAY {
        return Err(StoreError::LimitExceeded("start past end of day"));
    }
    if new.duration == 0 || new.duration > MAX_DURATION_MINUTES {
        return Err(StoreError::LimitExceeded("duration out of range"));
    }
    if new.user_name.len() > MAX_NAME_LEN {
        return Err(StoreError::LimitExceeded("user name too long"));
    }
    Ok(())
}

impl Engine {
    /// Take the slot lock for `key` and commit `new` as one WAL record.
    ///
    /// Fails with `SlotTaken` while a fresh lock guards the key. A stale lock
    /// is reclaimed. The overlap check is repeated under the resource guard,
    /// so a reservation that slipped in after the caller's pre-check is caught
    /// here as `Conflict`.
    pub async fn atomic_create(
        &self,
        key: SlotKey,
        new: NewReservation,
    ) -> Result<Reservation, StoreError> {
        validate_new(&key, &new)?;
        let rs = self
            .get_resource(&key.resource_id)
            .ok_or_else(|| StoreError::UnknownResource(key.resource_id.clone()))?;
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(StoreError::LimitExceeded("too many reservations on resource"));
        }

        let now = now_ms();
        let stale = match guard.lock(key.date, key.start) {
            Some(lock) if !lock.is_stale(now, self.lock_expiration_ms) => {
                return Err(StoreError::SlotTaken(key));
            }
            Some(lock) => Some(*lock),
            None => None,
        };

        let window = guard.on_dates(add_days(key.date, -1), add_days(key.date, 1));
        if let Some(existing) =
            find_timeline_conflict(&key.resource_id, key.date, key.start, new.duration, window)
        {
            return Err(StoreError::Conflict(existing.id));
        }

        if let Some(lock) = stale {
            warn!(
                key = %key,
                age_ms = now - lock.locked_at,
                previous = %lock.reservation_id,
                "reclaiming stale slot lock"
            );
            metrics::counter!(STALE_LOCKS_RECLAIMED_TOTAL).increment(1);
        }

        let reservation = new.into_reservation(Ulid::new(), now);
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
            locked_at: now,
        };
        self.persist_and_apply(&key.resource_id, &mut guard, &event)
            .await?;
        Ok(reservation)
    }

    /// Remove a reservation, then release its slot lock.
    ///
    /// The release is best effort: if it cannot be logged the lock stays
    /// until it goes stale and the reaper or the next booking reclaims it.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        let (resource_id, mut guard) = self.resolve_reservation_write(&id).await?;
        // Deleted between the index lookup and the guard.
        let removed = guard
            .reservation(id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;

        let event = Event::ReservationDeleted {
            id,
            resource_id: resource_id.clone(),
        };
        self.persist_and_apply(&resource_id, &mut guard, &event)
            .await?;

        let owns_lock = guard
            .lock(removed.date, removed.start)
            .is_some_and(|lock| lock.reservation_id == id);
        if owns_lock {
            let key = removed.slot_key();
            let release = Event::LockReleased { key: key.clone() };
            if let Err(e) = self.persist_and_apply(&resource_id, &mut guard, &release).await {
                warn!(key = %key, "lock release failed, leaving it to expire: {e}");
                metrics::counter!(LOCK_RELEASE_FAILURES_TOTAL).increment(1);
            }
        }
        Ok(removed)
    }

    /// Idempotent: setting the current value writes nothing.
    pub async fn set_maintenance(&self, enabled: bool) -> Result<(), StoreError> {
        let mut settings = self.settings.write().await;
        if settings.maintenance == enabled {
            return Ok(());
        }
        self.wal_append(&Event::MaintenanceChanged { enabled })
            .await?;
        settings.maintenance = enabled;
        info!(enabled, "maintenance mode changed");
        Ok(())
    }

    /// Stale locks whose reservation is gone. Skips resources that are busy.
    pub fn collect_stale_locks(&self, now: Ms) -> Vec<SlotKey> {
        let mut stale = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for (&(date, start), lock) in &guard.locks {
                    if lock.is_stale(now, self.lock_expiration_ms)
                        && guard.reservation(lock.reservation_id).is_none()
                    {
                        stale.push(SlotKey::new(date, guard.id.clone(), start));
                    }
                }
            }
        }
        stale.sort();
        stale
    }

    /// Release `key` if it is still a stale orphan under the guard.
    /// `Ok(false)` when someone reclaimed or released it first.
    pub async fn release_stale_lock(&self, key: &SlotKey, now: Ms) -> Result<bool, StoreError> {
        let rs = self
            .get_resource(&key.resource_id)
            .ok_or_else(|| StoreError::UnknownResource(key.resource_id.clone()))?;
        let mut guard = rs.write().await;
        let Some(lock) = guard.lock(key.date, key.start).copied() else {
            return Ok(false);
        };
        if !lock.is_stale(now, self.lock_expiration_ms)
            || guard.reservation(lock.reservation_id).is_some()
        {
            return Ok(false);
        }
        let event = Event::LockReleased { key: key.clone() };
        self.persist_and_apply(&key.resource_id, &mut guard, &event)
            .await?;
        Ok(true)
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    ///
    /// Every resource guard and the settings guard are held until the writer
    /// has swapped files, so no append can land in the discarded log.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let mut ids: Vec<String> = self.state.iter().map(|e| e.key().clone()).collect();
        ids.sort();

        let settings = self.settings.read().await;
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(rs) = self.get_resource(id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = Vec::new();
        if settings.maintenance {
            events.push(Event::MaintenanceChanged { enabled: true });
        }
        for guard in &guards {
            for r in &guard.reservations {
                // Orphaned locks are dropped here; live ones keep their age.
                let locked_at = guard
                    .lock(r.date, r.start)
                    .filter(|lock| lock.reservation_id == r.id)
                    .map_or(r.created_at, |lock| lock.locked_at);
                events.push(Event::ReservationCreated {
                    reservation: r.clone(),
                    locked_at,
                });
            }
        }
        let kept = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))?;

        drop(guards);
        drop(settings);
        info!(events = kept, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
