mod booking;
mod conflict;
mod error;
mod mutations;
mod queries;
mod sweep;

pub use booking::BookingRequest;
pub use conflict::{billable_hours, find_conflict, validate_window};
pub use error::EngineError;
pub use mutations::ReservationUpdate;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    metrics::counter!(crate::observability::WAL_WRITE_FAILURES_TOTAL).increment(1);
                    error!(events = batch.len(), "WAL flush failed: {e}");
                }
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    debug!("WAL writer stopped");
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            wal.discard_pending();
            return Err(e);
        }
    }
    // On failure the WAL has already cut itself back to its last durable length.
    wal.flush_sync()
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Send one event to the WAL writer and wait until it is durable.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { event, response: tx })
        .await
        .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
}

pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → resource id.
    pub(super) reservation_index: Arc<DashMap<Ulid, Ulid>>,
    /// Held shared by every mutation until its commit lands, exclusively by compaction.
    pub(super) gate: Arc<RwLock<()>>,
    /// Serializes resource creation so duplicate ids are caught.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) clock: Arc<dyn Clock>,
}

/// Apply an event to one ResourceState (caller holds the lock).
/// Events that touch several resources only apply their share.
fn apply_to_resource(rs: &mut ResourceState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ResourceUpdated { resource } => {
            if resource.id == rs.id() {
                rs.info = resource.clone();
            }
        }
        Event::ReservationCreated { reservation } => {
            if reservation.resource_id == rs.id() {
                index.insert(reservation.id, reservation.resource_id);
                rs.insert_reservation(reservation.clone());
            }
        }
        Event::ReservationUpdated {
            id,
            resource_id,
            status,
            payment_kind,
            at,
        } => {
            if *resource_id == rs.id()
                && let Some(r) = rs.reservation_mut(id)
            {
                r.set_status(*status, *at);
                r.payment_kind = *payment_kind;
            }
        }
        Event::HoldsExpired { ids, at } => {
            let rid = rs.id();
            for (resource_id, id) in ids {
                if *resource_id == rid
                    && let Some(r) = rs.reservation_mut(id)
                {
                    r.set_status(ReservationStatus::Expired, *at);
                }
            }
        }
        // ResourceCreated is handled at the DashMap level, not here
        Event::ResourceCreated { .. } => {}
    }
}

/// Resources an event touches (empty for ResourceCreated).
fn event_resource_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::ResourceCreated { .. } => Vec::new(),
        Event::ResourceUpdated { resource } => vec![resource.id],
        Event::ReservationCreated { reservation } => vec![reservation.resource_id],
        Event::ReservationUpdated { resource_id, .. } => vec![*resource_id],
        Event::HoldsExpired { ids, .. } => {
            let mut rids: Vec<Ulid> = ids.iter().map(|(rid, _)| *rid).collect();
            rids.sort();
            rids.dedup();
            rids
        }
    }
}

impl Engine {
    /// Open the engine on `wal_path`, replaying whatever the log already holds.
    /// Must be called inside a tokio runtime (spawns the WAL writer).
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        Ok(Self::from_log(wal, &events, clock))
    }

    /// Build the in-memory state from `events` and hand `wal` to the writer task.
    pub(crate) fn from_log(wal: Wal, events: &[Event], clock: Arc<dyn Clock>) -> Self {
        // Rebuild into plain maps first; nothing else can see them yet.
        let index = Arc::new(DashMap::new());
        let mut resources: HashMap<Ulid, ResourceState> = HashMap::new();
        for event in events {
            if let Event::ResourceCreated { resource } = event {
                resources.insert(resource.id, ResourceState::new(resource.clone()));
                continue;
            }
            for rid in event_resource_ids(event) {
                if let Some(rs) = resources.get_mut(&rid) {
                    apply_to_resource(rs, event, &index);
                }
            }
        }

        let state = DashMap::new();
        let reservation_count = index.len();
        for (id, rs) in resources {
            state.insert(id, Arc::new(RwLock::new(rs)));
        }
        info!(
            events = events.len(),
            resources = state.len(),
            reservations = reservation_count,
            "engine state replayed from {}",
            wal.path().display()
        );
        metrics::gauge!(crate::observability::RESOURCES_ACTIVE).set(state.len() as f64);

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Self {
            state,
            wal_tx,
            reservation_index: index,
            gate: Arc::new(RwLock::new(())),
            catalog_lock: Mutex::new(()),
            clock,
        }
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    pub(super) fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub(super) fn resource_for_reservation(&self, id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(id).map(|e| *e.value())
    }

    /// Shared hold on the compaction gate. Take it before any resource write lock.
    pub(super) async fn enter_gate(&self) -> OwnedRwLockReadGuard<()> {
        self.gate.clone().read_owned().await
    }

    /// Lookup reservation → resource, acquire the resource's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self
            .resource_for_reservation(id)
            .ok_or(EngineError::ReservationNotFound(*id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        Ok(rs.write_owned().await)
    }

    /// WAL-append + apply while the caller's write guards stay held.
    ///
    /// Runs on its own task, which owns the guards: if the caller is dropped
    /// mid-commit the write still either lands in both the log and memory or
    /// in neither.
    pub(super) async fn commit(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        mut guards: Vec<OwnedRwLockWriteGuard<ResourceState>>,
        event: Event,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let index = self.reservation_index.clone();
        let task = tokio::spawn(async move {
            wal_append(&wal_tx, event.clone()).await?;
            for guard in guards.iter_mut() {
                apply_to_resource(guard, &event, &index);
            }
            drop(guards);
            drop(gate);
            Ok::<(), EngineError>(())
        });
        task.await
            .map_err(|e| EngineError::PersistenceFailure(format!("commit task failed: {e}")))?
    }
}
