use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, SharedResourceState, StoreError};

impl Engine {
    fn resources_in_order(&self) -> Vec<SharedResourceState> {
        self.catalog
            .iter()
            .filter_map(|r| self.get_resource(&r.id))
            .collect()
    }

    /// Reservations dated `from..=to`, optionally on one resource only.
    /// Ordered by `(date, start, resource)`.
    pub async fn list_reservations(
        &self,
        resource_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        if let Some(id) = resource_id {
            let rs = self
                .get_resource(id)
                .ok_or_else(|| StoreError::UnknownResource(id.to_string()))?;
            let guard = rs.read().await;
            return Ok(guard.on_dates(from, to).to_vec());
        }

        let mut out = Vec::new();
        for rs in self.resources_in_order() {
            let guard = rs.read().await;
            out.extend_from_slice(guard.on_dates(from, to));
        }
        out.sort_by(|a, b| {
            (a.date, a.start, &a.resource_id).cmp(&(b.date, b.start, &b.resource_id))
        });
        Ok(out)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let resource_id = self.resource_for_reservation(&id)?;
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        guard.reservation(id).cloned()
    }

    /// Reservations strictly before `before`, newest first.
    pub async fn history(&self, before: &HistoryCursor, limit: usize) -> Vec<Reservation> {
        let mut out = Vec::new();
        for rs in self.resources_in_order() {
            let guard = rs.read().await;
            let end = guard.reservations.partition_point(|r| before.is_after(r));
            // Each resource is sorted, so its newest `limit` are a suffix.
            let from = end.saturating_sub(limit);
            out.extend_from_slice(&guard.reservations[from..end]);
        }
        out.sort_by(|a, b| {
            (b.date, b.start, &b.resource_id).cmp(&(a.date, a.start, &a.resource_id))
        });
        out.truncate(limit);
        out
    }

    pub async fn settings(&self) -> Settings {
        *self.settings.read().await
    }

    /// Configured resources, in configuration order.
    pub fn resources(&self) -> Vec<ResourceInfo> {
        self.catalog.clone()
    }

    pub async fn reservation_count(&self) -> usize {
        let mut total = 0;
        for rs in self.resources_in_order() {
            total += rs.read().await.reservations.len();
        }
        total
    }

    /// Live slot lock for a key, if any. Exposed for diagnostics and tests.
    pub async fn slot_lock(&self, key: &SlotKey) -> Option<SlotLock> {
        let rs = self.get_resource(&key.resource_id)?;
        let guard = rs.read().await;
        guard.lock(key.date, key.start).copied()
    }
}
