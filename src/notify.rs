use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Event, ReservationInfo};

const CHANNEL_CAPACITY: usize = 256;

/// Change on one resource's schedule, as published to watchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    Booked(ReservationInfo),
    Cancelled { id: Ulid, resource_id: String },
}

impl Notice {
    /// Schedule-visible events only; lock and settings churn is not published.
    pub fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::ReservationCreated { reservation, .. } => Some(Notice::Booked(reservation.info())),
            Event::ReservationDeleted { id, resource_id } => Some(Notice::Cancelled {
                id: *id,
                resource_id: resource_id.clone(),
            }),
            Event::LockReleased { .. } | Event::MaintenanceChanged { .. } => None,
        }
    }
}

/// Per-resource broadcast of schedule changes.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notice>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, resource_id: &str) -> broadcast::Receiver<Notice> {
        self.channels
            .entry(resource_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op when nobody is watching the resource.
    pub fn send(&self, resource_id: &str, event: &Event) {
        let Some(sender) = self.channels.get(resource_id) else {
            return;
        };
        if let Some(notice) = Notice::from_event(event) {
            let _ = sender.send(notice);
        }
    }
}
