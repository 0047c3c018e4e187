use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

impl Engine {
    /// `(resource_id, reservation_id)` of every pending reservation whose hold
    /// deadline is before `now`. Read-only snapshot; [`Engine::sweep_expired_holds`]
    /// re-checks under write locks.
    pub async fn collect_lapsed_holds(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut lapsed = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            lapsed.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.hold_lapsed(now))
                    .map(|r| (r.resource_id, r.id)),
            );
        }
        lapsed
    }

    /// Demote every lapsed hold to `expired` in a single WAL event.
    ///
    /// Write locks on the affected resources are taken in sorted order and held
    /// until the event is applied, so the whole batch becomes visible at once.
    /// Returns the number of reservations expired.
    pub async fn sweep_expired_holds(&self) -> Result<usize, EngineError> {
        let gate = self.enter_gate().await;
        let now = self.now();

        let mut resource_ids: Vec<Ulid> = self
            .collect_lapsed_holds(now)
            .await
            .into_iter()
            .map(|(rid, _)| rid)
            .collect();
        if resource_ids.is_empty() {
            return Ok(0);
        }
        resource_ids.sort();
        resource_ids.dedup();

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut guards = Vec::with_capacity(resource_ids.len());
        for rid in &resource_ids {
            if let Some(rs) = self.get_resource(rid) {
                guards.push(rs.write_owned().await);
            }
        }

        // A hold may have been paid or cancelled since the scan.
        let ids: Vec<(Ulid, Ulid)> = guards
            .iter()
            .flat_map(|g| {
                g.reservations
                    .iter()
                    .filter(|r| r.hold_lapsed(now))
                    .map(|r| (r.resource_id, r.id))
            })
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let count = ids.len();
        self.commit(gate, guards, Event::HoldsExpired { ids, at: now })
            .await?;

        metrics::counter!(observability::HOLDS_EXPIRED_TOTAL).increment(count as u64);
        info!(count, resources = resource_ids.len(), "expired lapsed holds");
        Ok(count)
    }
}
