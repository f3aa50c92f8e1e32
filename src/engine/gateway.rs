use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{HistoryCursor, NewReservation, Reservation, ResourceInfo, Settings, SlotKey};
use crate::store::ReservationStore;

use super::{Engine, StoreError};

#[async_trait]
impl ReservationStore for Engine {
    async fn query_range(
        &self,
        resource_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.list_reservations(resource_id, from, to).await
    }

    async fn atomic_create(
        &self,
        key: SlotKey,
        new: NewReservation,
    ) -> Result<Reservation, StoreError> {
        Engine::atomic_create(self, key, new).await
    }

    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.get_reservation(id).await)
    }

    async fn delete(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.delete_reservation(id).await
    }

    async fn history(
        &self,
        before: &HistoryCursor,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(Engine::history(self, before, limit).await)
    }

    async fn settings(&self) -> Result<Settings, StoreError> {
        Ok(Engine::settings(self).await)
    }

    async fn set_maintenance(&self, enabled: bool) -> Result<(), StoreError> {
        Engine::set_maintenance(self, enabled).await
    }

    fn resources(&self) -> Vec<ResourceInfo> {
        Engine::resources(self)
    }
}
