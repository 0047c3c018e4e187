use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::lifecycle::{check_transition, Actor, Requester};
use crate::limits::*;
use crate::model::*;

use super::{wal_append, Engine, EngineError, WalCommand};

/// Operator edit of an existing reservation. `None` leaves a field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationUpdate {
    pub status: Option<ReservationStatus>,
    pub payment_kind: Option<PaymentKind>,
}

fn validate_resource(resource: &ResourceInfo) -> Result<(), EngineError> {
    if resource.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    if let Some(ref loc) = resource.location
        && loc.len() > MAX_LOCATION_LEN
    {
        return Err(EngineError::LimitExceeded("resource location too long"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn create_resource(&self, resource: ResourceInfo) -> Result<(), EngineError> {
        validate_resource(&resource)?;
        let _gate = self.enter_gate().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.state.contains_key(&resource.id) {
            return Err(EngineError::ResourceExists(resource.id));
        }

        let id = resource.id;
        wal_append(
            &self.wal_tx,
            Event::ResourceCreated {
                resource: resource.clone(),
            },
        )
        .await?;
        self.state
            .insert(id, Arc::new(RwLock::new(ResourceState::new(resource))));
        metrics::gauge!(crate::observability::RESOURCES_ACTIVE).set(self.state.len() as f64);
        info!(resource_id = %id, "resource created");
        Ok(())
    }

    /// Replace a resource's catalog data. Existing reservations keep the price
    /// they were created with.
    pub async fn update_resource(&self, resource: ResourceInfo) -> Result<(), EngineError> {
        validate_resource(&resource)?;
        let gate = self.enter_gate().await;
        let rs = self
            .get_resource(&resource.id)
            .ok_or(EngineError::ResourceNotFound(resource.id))?;
        let guard = rs.write_owned().await;
        self.commit(gate, vec![guard], Event::ResourceUpdated { resource })
            .await
    }

    // ── Reservation lifecycle ────────────────────────────────

    /// Operator/superoperator edit of status and payment kind.
    pub async fn update_reservation(
        &self,
        requester: &Requester,
        id: Ulid,
        update: ReservationUpdate,
    ) -> Result<Reservation, EngineError> {
        if !requester.policy().direct_status_allowed {
            return Err(EngineError::Forbidden("only operators may edit reservations"));
        }
        self.transition(id, update, Actor::Operator).await
    }

    /// Cancel a reservation. Requesters may cancel their own; operators any.
    pub async fn cancel_reservation(
        &self,
        requester: &Requester,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let actor = if requester.policy().direct_status_allowed {
            Actor::Operator
        } else {
            let resource_id = self
                .resource_for_reservation(&id)
                .ok_or(EngineError::ReservationNotFound(id))?;
            let rs = self
                .get_resource(&resource_id)
                .ok_or(EngineError::ResourceNotFound(resource_id))?;
            let owner = rs
                .read()
                .await
                .reservation(&id)
                .map(|r| r.requester_id)
                .ok_or(EngineError::ReservationNotFound(id))?;
            if owner != requester.id {
                return Err(EngineError::Forbidden("not the owner of this reservation"));
            }
            Actor::Requester
        };
        let update = ReservationUpdate {
            status: Some(ReservationStatus::Cancelled),
            payment_kind: None,
        };
        self.transition(id, update, actor).await
    }

    async fn transition(
        &self,
        id: Ulid,
        update: ReservationUpdate,
        actor: Actor,
    ) -> Result<Reservation, EngineError> {
        let gate = self.enter_gate().await;
        let guard = self.resolve_reservation_write(&id).await?;
        let current = guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;

        // Terminal reservations are frozen, including their payment kind.
        let status = update.status.unwrap_or(current.status);
        check_transition(current.status, status, actor)?;
        let payment_kind = update.payment_kind.unwrap_or(current.payment_kind);
        if status == current.status && payment_kind == current.payment_kind {
            return Ok(current);
        }

        let at = self.now();
        let event = Event::ReservationUpdated {
            id,
            resource_id: current.resource_id,
            status,
            payment_kind,
            at,
        };
        self.commit(gate, vec![guard], event).await?;

        info!(
            reservation_id = %id,
            from = %current.status,
            to = %status,
            ?actor,
            "reservation updated"
        );
        let mut updated = current;
        updated.set_status(status, at);
        updated.payment_kind = payment_kind;
        Ok(updated)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive gate: no mutation is between its check and its apply.
        let _gate = self.gate.write().await;

        let mut resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        resource_ids.sort();

        let mut events = Vec::new();
        for id in resource_ids {
            let Some(rs) = self.get_resource(&id) else {
                continue;
            };
            let guard = rs.read().await;
            events.push(Event::ResourceCreated {
                resource: guard.info.clone(),
            });
            for reservation in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: reservation.clone(),
                });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        info!(events = count, "WAL compacted");
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
