mod error;
mod gateway;
mod mutations;
mod queries;

pub use error::StoreError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::config::ResourceConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

type AppendAck = oneshot::Sender<io::Result<()>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: AppendAck,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Every append that is already queued when the first one
/// arrives rides the same fsync; a control command ends the batch early.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                control => {
                    deferred = Some(control);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(control) = deferred {
            handle_control(&mut wal, control);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, AppendAck)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = write_batch(wal, &batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for (_, ack) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = ack.send(reply);
    }
}

/// All or nothing: a batch that cannot be staged in full is not written.
fn write_batch(wal: &mut Wal, batch: &[(Event, AppendAck)]) -> io::Result<()> {
    if let Err(e) = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
    {
        wal.discard_pending();
        return Err(e);
    }
    wal.flush_sync()
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Apply an event to one resource. The caller holds the write guard.
fn apply_to_resource(rs: &mut ResourceState, event: &Event, index: &DashMap<Ulid, String>) {
    match event {
        Event::ReservationCreated {
            reservation,
            locked_at,
        } => {
            rs.locks.insert(
                (reservation.date, reservation.start),
                SlotLock {
                    reservation_id: reservation.id,
                    locked_at: *locked_at,
                },
            );
            index.insert(reservation.id, reservation.resource_id.clone());
            rs.insert_reservation(reservation.clone());
        }
        Event::ReservationDeleted { id, .. } => {
            rs.remove_reservation(*id);
            index.remove(id);
        }
        Event::LockReleased { key } => {
            rs.locks.remove(&(key.date, key.start));
        }
        // Global; handled by the engine.
        Event::MaintenanceChanged { .. } => {}
    }
}

/// WAL-backed reservation store for a fixed set of resources.
///
/// Each resource's schedule and slot locks sit behind one `RwLock`; holding
/// its write guard is what makes lock-check-and-insert atomic. Unrelated
/// resources never contend.
pub struct Engine {
    pub state: DashMap<String, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reservation id → resource id.
    pub(super) reservation_index: DashMap<Ulid, String>,
    pub(super) settings: RwLock<Settings>,
    pub(super) catalog: Vec<ResourceInfo>,
    pub(super) lock_expiration_ms: Ms,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the background writer. Must be
    /// called from within a Tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        resources: &[ResourceConfig],
        lock_expiration_ms: Ms,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let (events, valid_len) = Wal::scan(&wal_path)?;
        let wal = Wal::open_valid(&wal_path, valid_len)?;

        let state = DashMap::new();
        let mut catalog = Vec::with_capacity(resources.len());
        for r in resources {
            state.insert(
                r.id.clone(),
                Arc::new(RwLock::new(ResourceState::new(r.id.clone(), r.name.clone()))),
            );
            catalog.push(ResourceInfo {
                id: r.id.clone(),
                name: r.name.clone(),
            });
        }

        // Nothing else can see these locks yet, so try_write never fails in
        // practice. Never block here: this may run inside the runtime.
        let reservation_index = DashMap::new();
        let mut settings = Settings::default();
        for event in &events {
            if let Event::MaintenanceChanged { enabled } = event {
                settings.maintenance = *enabled;
                continue;
            }
            let Some(resource_id) = event.resource_id() else {
                continue;
            };
            let Some(entry) = state.get(resource_id) else {
                warn!("replay: skipping event for unconfigured resource {resource_id}");
                continue;
            };
            let mut guard = entry
                .value()
                .try_write()
                .map_err(|_| io::Error::other("replay: resource state contended"))?;
            apply_to_resource(&mut guard, event, &reservation_index);
        }

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            state,
            wal_tx,
            notify,
            reservation_index,
            settings: RwLock::new(settings),
            catalog,
            lock_expiration_ms,
        })
    }

    /// Durably append one event through the group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &str) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_reservation(&self, id: &Ulid) -> Option<String> {
        self.reservation_index.get(id).map(|e| e.value().clone())
    }

    pub fn lock_expiration_ms(&self) -> Ms {
        self.lock_expiration_ms
    }

    /// Log, apply, then publish. Nothing is applied if the log write fails.
    pub(super) async fn persist_and_apply(
        &self,
        resource_id: &str,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.reservation_index);
        self.notify.send(resource_id, event);
        Ok(())
    }

    /// Look up the reservation's resource and take its write guard.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<(String, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), StoreError> {
        let resource_id = self
            .resource_for_reservation(id)
            .ok_or(StoreError::NotFound(*id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or_else(|| StoreError::UnknownResource(resource_id.clone()))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }
}
