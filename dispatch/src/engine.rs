//! Dispatch engine facade.
//!
//! Responsibilities:
//! - Manual assignment: pass straight through to the locked transaction.
//! - Auto assignment: snapshot-select a candidate in the package's zone, then
//!   run the same transaction against it. One attempt only; a conflict on the
//!   chosen deliverer is returned to the caller, who decides whether to retry.
//!
//! Non-responsibilities:
//! - Cache invalidation and other post-dispatch hooks (the caller owns them).
//! - Retrying on conflict or on persistence failure.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use common::logger::warn_if_slow;
use records::model::{Deliverer, DelivererId, PackageId, PackageStatus, ZoneId};
use records::store::RecordStore;
use tracing::{debug, error, field, info, instrument, warn};

use crate::error::{ConflictReason, DispatchError, Missing};
use crate::metrics::DispatchCounters;
use crate::policy;
use crate::transaction::{self, Assignment};

/// Lock waits beyond this show up as `performance` warnings.
const SLOW_DISPATCH: Duration = Duration::from_millis(250);

pub struct DispatchEngine {
    store: Arc<dyn RecordStore>,
    counters: DispatchCounters,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_counters(store, DispatchCounters::default())
    }

    pub fn with_counters(store: Arc<dyn RecordStore>, counters: DispatchCounters) -> Self {
        Self { store, counters }
    }

    pub fn counters(&self) -> &DispatchCounters {
        &self.counters
    }

    /// Assign `package_id` to an explicitly named deliverer.
    #[instrument(
        skip(self),
        target = "dispatch",
        fields(mode = "manual")
    )]
    pub async fn assign_manual(
        &self,
        package_id: PackageId,
        deliverer_id: DelivererId,
    ) -> Result<Assignment, DispatchError> {
        let res = self.run(package_id, deliverer_id).await;
        self.record(&res);
        res
    }

    /// Assign `package_id` to the best deliverer in its zone.
    #[instrument(
        skip(self),
        target = "dispatch",
        fields(mode = "auto", package_id = %package_id, deliverer_id = field::Empty)
    )]
    pub async fn assign_auto(&self, package_id: PackageId) -> Result<Assignment, DispatchError> {
        let res = self.auto(package_id).await;
        self.record(&res);
        res
    }

    /// Best candidate in `zone_id` from a snapshot read. Takes no locks.
    #[instrument(skip(self), target = "dispatch")]
    pub async fn find_best(&self, zone_id: ZoneId) -> Result<Option<Deliverer>, DispatchError> {
        let snapshot = self
            .store
            .deliverers_in_zone(zone_id)
            .await
            .with_context(|| format!("failed to list deliverers in zone {zone_id}"))?;

        let best = policy::select_best(zone_id, &snapshot).cloned();
        debug!(
            candidates = snapshot.len(),
            selected = ?best.as_ref().map(|d| d.id),
            "selection finished"
        );
        Ok(best)
    }

    async fn auto(&self, package_id: PackageId) -> Result<Assignment, DispatchError> {
        let package = self
            .store
            .fetch_package(package_id)
            .await
            .with_context(|| format!("failed to load package {package_id}"))?
            .ok_or(DispatchError::NotFound(Missing::Package))?;

        // Status never returns to pending, so a stale snapshot cannot wrongly refuse.
        if package.status != PackageStatus::Pending {
            return Err(DispatchError::Conflict(ConflictReason::AlreadyAssigned));
        }

        let best = self
            .find_best(package.zone_id)
            .await?
            .ok_or(DispatchError::NotFound(Missing::AvailableDelivererInZone(
                package.zone_id,
            )))?;

        tracing::Span::current().record("deliverer_id", field::display(best.id));
        self.run(package_id, best.id).await
    }

    async fn run(
        &self,
        package_id: PackageId,
        deliverer_id: DelivererId,
    ) -> Result<Assignment, DispatchError> {
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        warn_if_slow(
            "dispatch_transaction",
            SLOW_DISPATCH,
            transaction::assign(self.store.as_ref(), package_id, deliverer_id),
        )
        .await
    }

    fn record(&self, res: &Result<Assignment, DispatchError>) {
        match res {
            Ok(a) => {
                self.counters.assigned.fetch_add(1, Ordering::Relaxed);
                info!(
                    deliverer_load = a.deliverer.current_capacity,
                    remaining = a.deliverer.remaining_capacity(),
                    "package assigned"
                );
            }
            Err(err @ DispatchError::NotFound(_)) => {
                self.counters.not_found.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %err.kind(), "dispatch refused: {err}");
            }
            Err(err @ DispatchError::Conflict(_)) => {
                self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %err.kind(), "dispatch refused: {err}");
            }
            Err(err @ DispatchError::Internal(_)) => {
                self.counters.internal.fetch_add(1, Ordering::Relaxed);
                error!(kind = %err.kind(), error = %err, "dispatch failed");
            }
        }
    }
}
