pub mod memory;

use async_trait::async_trait;

use crate::model::{Deliverer, DelivererId, Package, PackageId, ZoneId};

/// Transactional record store consumed by the dispatch engine.
///
/// Snapshot reads (`fetch_*`, `deliverers_in_zone`) take no locks and may be
/// stale by the time a caller acts on them. Anything that must hold under
/// contention goes through a `StoreTx`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open a READ COMMITTED transaction.
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>>;

    async fn fetch_package(&self, id: PackageId) -> anyhow::Result<Option<Package>>;

    async fn fetch_deliverer(&self, id: DelivererId) -> anyhow::Result<Option<Deliverer>>;

    /// Deliverers whose current zone is `zone_id`, in no particular order.
    /// Unavailable and full deliverers are included; callers filter.
    async fn deliverers_in_zone(&self, zone_id: ZoneId) -> anyhow::Result<Vec<Deliverer>>;
}

/// One in-flight transaction.
///
/// Row locks are exclusive and held until `commit`/`rollback`. Deliverer rows
/// must be locked before package rows; implementations reject the reverse
/// order. Dropping an unfinished transaction rolls it back.
#[async_trait]
pub trait StoreTx: Send {
    /// Lock the deliverer row and return its current committed state.
    async fn lock_deliverer(&mut self, id: DelivererId) -> anyhow::Result<Option<Deliverer>>;

    /// Lock the package row and return its current committed state.
    async fn lock_package(&mut self, id: PackageId) -> anyhow::Result<Option<Package>>;

    /// Bind a locked, pending package to `deliverer_id` and mark it assigned.
    async fn set_assigned(
        &mut self,
        package_id: PackageId,
        deliverer_id: DelivererId,
    ) -> anyhow::Result<Package>;

    /// Add one to a locked deliverer's `current_capacity`.
    async fn increment_capacity(&mut self, deliverer_id: DelivererId) -> anyhow::Result<Deliverer>;

    async fn commit(&mut self) -> anyhow::Result<()>;

    async fn rollback(&mut self) -> anyhow::Result<()>;
}
