use ulid::Ulid;

use crate::lifecycle::Requester;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_resource_info(&self, id: Ulid) -> Result<ResourceInfo, EngineError> {
        let rs = self
            .get_resource(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.info.clone())
    }

    /// All resources, ordered by id.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(resources.len());
        for rs in resources {
            infos.push(rs.read().await.info.clone());
        }
        infos.sort_by_key(|r| r.id);
        infos
    }

    /// Fetch one reservation. Owners may read their own; operators any.
    pub async fn get_reservation(
        &self,
        requester: &Requester,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let resource_id = self
            .resource_for_reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let reservation = rs
            .read()
            .await
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        if reservation.requester_id != requester.id && !requester.policy().direct_status_allowed {
            return Err(EngineError::Forbidden("not the owner of this reservation"));
        }
        Ok(reservation)
    }

    /// Every reservation in the system, ordered by creation. Operators only.
    pub async fn list_reservations(
        &self,
        requester: &Requester,
    ) -> Result<Vec<Reservation>, EngineError> {
        if !requester.policy().direct_status_allowed {
            return Err(EngineError::Forbidden("only operators may list all reservations"));
        }
        Ok(self.collect_reservations(|_| true).await)
    }

    /// The requester's own reservations, ordered by creation.
    pub async fn list_reservations_for(&self, requester: &Requester) -> Vec<Reservation> {
        let owner = requester.id;
        self.collect_reservations(|r| r.requester_id == owner).await
    }

    /// Reservations on one resource, ordered by start.
    pub async fn list_resource_reservations(
        &self,
        resource_id: Ulid,
    ) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    async fn collect_reservations(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            out.extend(guard.reservations.iter().filter(|&r| keep(r)).cloned());
        }
        out.sort_by_key(|r| (r.created_at, r.id));
        out
    }
}
