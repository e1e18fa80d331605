//! The locked assignment transaction.
//!
//! Lock order is fixed: deliverer row first, then package row. Every
//! precondition is evaluated on locked rows, so a snapshot read taken
//! before `begin` can never authorize a write.

use anyhow::Context;
use records::model::{Deliverer, DelivererId, Package, PackageId, PackageStatus};
use records::store::{RecordStore, StoreTx};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ConflictReason, DispatchError, Missing};

/// Committed result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub package: Package,
    pub deliverer: Deliverer,
}

/// Bind `package_id` to `deliverer_id` in one transaction.
///
/// On any failure the transaction is rolled back before the error is
/// returned; nothing is partially applied.
pub async fn assign(
    store: &dyn RecordStore,
    package_id: PackageId,
    deliverer_id: DelivererId,
) -> Result<Assignment, DispatchError> {
    let mut tx = store
        .begin()
        .await
        .context("failed to open dispatch transaction")?;

    match assign_locked(tx.as_mut(), package_id, deliverer_id).await {
        Ok(assignment) => {
            tx.commit()
                .await
                .with_context(|| format!("failed to commit assignment of package {package_id}"))?;
            Ok(assignment)
        }
        Err(err) => {
            if let Err(rb) = tx.rollback().await {
                warn!(
                    target: "dispatch",
                    package_id,
                    deliverer_id,
                    error = %rb,
                    "rollback after failed assignment did not complete"
                );
            }
            Err(err)
        }
    }
}

async fn assign_locked(
    tx: &mut dyn StoreTx,
    package_id: PackageId,
    deliverer_id: DelivererId,
) -> Result<Assignment, DispatchError> {
    let deliverer = tx
        .lock_deliverer(deliverer_id)
        .await
        .with_context(|| format!("failed to lock deliverer {deliverer_id}"))?
        .ok_or(DispatchError::NotFound(Missing::Deliverer))?;

    if !deliverer.is_available {
        return Err(DispatchError::Conflict(ConflictReason::DelivererUnavailable));
    }
    if !deliverer.has_free_slot() {
        return Err(DispatchError::Conflict(ConflictReason::CapacityExceeded));
    }

    let package = tx
        .lock_package(package_id)
        .await
        .with_context(|| format!("failed to lock package {package_id}"))?
        .ok_or(DispatchError::NotFound(Missing::Package))?;

    if package.status != PackageStatus::Pending {
        return Err(DispatchError::Conflict(ConflictReason::AlreadyAssigned));
    }

    debug!(
        target: "dispatch",
        package_id,
        deliverer_id,
        load = deliverer.current_capacity,
        max = deliverer.max_capacity,
        "preconditions hold under lock"
    );

    let package = tx.set_assigned(package_id, deliverer_id).await?;
    let deliverer = tx.increment_capacity(deliverer_id).await?;

    Ok(Assignment { package, deliverer })
}
