//! The persistence seam the admission controller talks to.

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::engine::StoreError;
use crate::model::{HistoryCursor, NewReservation, Reservation, ResourceInfo, Settings, SlotKey};

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Reservations dated `from..=to`; all resources when `resource_id` is `None`.
    async fn query_range(
        &self,
        resource_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Acquire the lock for `key` and persist `new` in one atomic step.
    /// Losing the slot surfaces as `SlotTaken` or `Conflict`.
    async fn atomic_create(
        &self,
        key: SlotKey,
        new: NewReservation,
    ) -> Result<Reservation, StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    async fn delete(&self, id: Ulid) -> Result<Reservation, StoreError>;

    /// Strictly before `before` in `(date, start, resource)` order, newest first.
    async fn history(
        &self,
        before: &HistoryCursor,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn settings(&self) -> Result<Settings, StoreError>;

    async fn set_maintenance(&self, enabled: bool) -> Result<(), StoreError>;

    fn resources(&self) -> Vec<ResourceInfo>;
}
