//! In-process `RecordStore` with per-row exclusive locks.
//!
//! Committed rows live in `parking_lot` maps. Each row additionally owns an
//! async mutex standing in for a database row lock; a transaction holds the
//! owned guard until it finishes. Writes are staged on a private copy of the
//! locked row and published under both table write locks on commit, so no
//! reader ever observes a half-applied transaction.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{Context, anyhow, bail, ensure};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, instrument};

use super::{RecordStore, StoreTx};
use crate::model::{
    Deliverer, DelivererId, NewDeliverer, NewPackage, Package, PackageId, PackageStatus, Zone,
    ZoneId,
};

#[derive(Default)]
struct Tables {
    zones: RwLock<HashMap<ZoneId, Zone>>,
    deliverers: RwLock<HashMap<DelivererId, Deliverer>>,
    packages: RwLock<HashMap<PackageId, Package>>,
}

/// Lazily created row locks keyed by primary key.
struct LockTable<K> {
    rows: Mutex<HashMap<K, Arc<RowLock<()>>>>,
}

/// Only ids with a committed row get an entry, so the table grows with the
/// data and not with lookups.
impl<K: Eq + Hash + Copy> LockTable<K> {
    fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    fn handle(&self, key: K) -> Arc<RowLock<()>> {
        self.rows.lock().entry(key).or_default().clone()
    }
}

struct Inner {
    tables: Tables,
    deliverer_locks: LockTable<DelivererId>,
    package_locks: LockTable<PackageId>,
    next_id: AtomicI64,
    lock_timeout: Option<Duration>,
}

impl Inner {
    async fn acquire(
        &self,
        lock: Arc<RowLock<()>>,
        row: String,
    ) -> anyhow::Result<OwnedMutexGuard<()>> {
        match self.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, lock.lock_owned())
                .await
                .map_err(|_| anyhow!("lock wait on {row} exceeded {limit:?}")),
            None => Ok(lock.lock_owned().await),
        }
    }
}

/// Shared handle; clones see the same tables.
#[derive(Clone)]
pub struct MemoryRecordStore {
    inner: Arc<Inner>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Fail lock waits that exceed `limit`, like a database `lock_timeout`.
    pub fn with_lock_timeout(limit: Duration) -> Self {
        Self::build(Some(limit))
    }

    fn build(lock_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Tables::default(),
                deliverer_locks: LockTable::new(),
                package_locks: LockTable::new(),
                next_id: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }

    fn next_id(&self) -> i64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_zone(&self, name: impl Into<String>, city: impl Into<String>) -> Zone {
        let zone = Zone {
            id: self.next_id(),
            name: name.into(),
            city: city.into(),
            created_at: Utc::now(),
        };
        self.inner
            .tables
            .zones
            .write()
            .insert(zone.id, zone.clone());
        zone
    }

    pub fn add_deliverer(&self, new: NewDeliverer) -> anyhow::Result<Deliverer> {
        new.validate()?;
        if let Some(zone_id) = new.current_zone_id {
            ensure!(
                self.inner.tables.zones.read().contains_key(&zone_id),
                "zone {zone_id} does not exist"
            );
        }

        let deliverer = Deliverer {
            id: self.next_id(),
            name: new.name,
            max_capacity: new.max_capacity,
            current_capacity: new.current_capacity,
            is_available: new.is_available,
            current_zone_id: new.current_zone_id,
            created_at: Utc::now(),
        };
        self.inner
            .tables
            .deliverers
            .write()
            .insert(deliverer.id, deliverer.clone());
        Ok(deliverer)
    }

    pub fn add_package(&self, new: NewPackage) -> anyhow::Result<Package> {
        ensure!(
            self.inner.tables.zones.read().contains_key(&new.zone_id),
            "zone {} does not exist",
            new.zone_id
        );

        let package = Package {
            id: self.next_id(),
            tracking_number: new.tracking_number,
            zone_id: new.zone_id,
            deliverer_id: None,
            status: PackageStatus::Pending,
            created_at: Utc::now(),
        };
        self.inner
            .tables
            .packages
            .write()
            .insert(package.id, package.clone());
        Ok(package)
    }

    /// External availability toggle. Takes the deliverer row lock so it
    /// serializes with in-flight dispatches.
    pub async fn set_availability(&self, id: DelivererId, available: bool) -> anyhow::Result<()> {
        ensure!(
            self.inner.tables.deliverers.read().contains_key(&id),
            "deliverer {id} not found"
        );
        let _guard = self
            .inner
            .acquire(self.inner.deliverer_locks.handle(id), format!("deliverer {id}"))
            .await?;

        let mut deliverers = self.inner.tables.deliverers.write();
        let d = deliverers
            .get_mut(&id)
            .ok_or_else(|| anyhow!("deliverer {id} not found"))?;
        d.is_available = available;
        Ok(())
    }

    /// Status update performed by delivery tracking after dispatch
    /// (`assigned -> in_transit -> delivered`, `pending -> cancelled`).
    pub async fn advance_package(
        &self,
        id: PackageId,
        next: PackageStatus,
    ) -> anyhow::Result<Package> {
        ensure!(
            next != PackageStatus::Assigned,
            "packages are assigned through dispatch only"
        );
        ensure!(
            self.inner.tables.packages.read().contains_key(&id),
            "package {id} not found"
        );

        let _guard = self
            .inner
            .acquire(self.inner.package_locks.handle(id), format!("package {id}"))
            .await?;

        let mut packages = self.inner.tables.packages.write();
        let p = packages
            .get_mut(&id)
            .ok_or_else(|| anyhow!("package {id} not found"))?;
        ensure!(
            p.status.can_transition_to(next),
            "illegal package transition {} -> {}",
            p.status,
            next
        );
        p.status = next;
        Ok(p.clone())
    }

    /// Every committed deliverer, for invariant checks.
    pub fn all_deliverers(&self) -> Vec<Deliverer> {
        self.inner.tables.deliverers.read().values().cloned().collect()
    }

    /// Every committed package, for invariant checks.
    pub fn all_packages(&self) -> Vec<Package> {
        self.inner.tables.packages.read().values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx::new(self.inner.clone())))
    }

    async fn fetch_package(&self, id: PackageId) -> anyhow::Result<Option<Package>> {
        Ok(self.inner.tables.packages.read().get(&id).cloned())
    }

    async fn fetch_deliverer(&self, id: DelivererId) -> anyhow::Result<Option<Deliverer>> {
        Ok(self.inner.tables.deliverers.read().get(&id).cloned())
    }

    async fn deliverers_in_zone(&self, zone_id: ZoneId) -> anyhow::Result<Vec<Deliverer>> {
        Ok(self
            .inner
            .tables
            .deliverers
            .read()
            .values()
            .filter(|d| d.current_zone_id == Some(zone_id))
            .cloned()
            .collect())
    }
}

/// Transaction over a `MemoryRecordStore`.
pub struct MemoryTx {
    inner: Arc<Inner>,
    guards: Vec<OwnedMutexGuard<()>>,
    locked_deliverers: HashSet<DelivererId>,
    locked_packages: HashSet<PackageId>,
    /// Working copies of locked rows; published on commit.
    deliverers: HashMap<DelivererId, Deliverer>,
    packages: HashMap<PackageId, Package>,
    finished: bool,
}

impl MemoryTx {
    fn new(inner: Arc<Inner>) -> Self {
        Self {
            inner,
            guards: Vec::new(),
            locked_deliverers: HashSet::new(),
            locked_packages: HashSet::new(),
            deliverers: HashMap::new(),
            packages: HashMap::new(),
            finished: false,
        }
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        ensure!(!self.finished, "transaction already finished");
        Ok(())
    }

    fn release(&mut self) {
        self.finished = true;
        self.deliverers.clear();
        self.packages.clear();
        self.locked_deliverers.clear();
        self.locked_packages.clear();
        // Guards go last: other transactions may proceed from here on.
        self.guards.clear();
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    #[instrument(skip(self), target = "store", level = "debug")]
    async fn lock_deliverer(&mut self, id: DelivererId) -> anyhow::Result<Option<Deliverer>> {
        self.ensure_open()?;
        if !self.locked_packages.is_empty() {
            bail!("lock order violation: deliverer {id} requested after a package lock");
        }
        if self.locked_deliverers.contains(&id) {
            return Ok(self.deliverers.get(&id).cloned());
        }
        // Rows are never deleted, so a missing id stays missing.
        if !self.inner.tables.deliverers.read().contains_key(&id) {
            self.locked_deliverers.insert(id);
            debug!(found = false, "deliverer row locked");
            return Ok(None);
        }

        let guard = self
            .inner
            .acquire(self.inner.deliverer_locks.handle(id), format!("deliverer {id}"))
            .await?;
        self.guards.push(guard);
        self.locked_deliverers.insert(id);

        // Models the store round-trip so contending transactions interleave.
        tokio::task::yield_now().await;

        let row = self.inner.tables.deliverers.read().get(&id).cloned();
        if let Some(d) = &row {
            self.deliverers.insert(id, d.clone());
        }
        debug!(found = row.is_some(), "deliverer row locked");
        Ok(row)
    }

    #[instrument(skip(self), target = "store", level = "debug")]
    async fn lock_package(&mut self, id: PackageId) -> anyhow::Result<Option<Package>> {
        self.ensure_open()?;
        if self.locked_packages.contains(&id) {
            return Ok(self.packages.get(&id).cloned());
        }
        if !self.inner.tables.packages.read().contains_key(&id) {
            self.locked_packages.insert(id);
            debug!(found = false, "package row locked");
            return Ok(None);
        }

        let guard = self
            .inner
            .acquire(self.inner.package_locks.handle(id), format!("package {id}"))
            .await?;
        self.guards.push(guard);
        self.locked_packages.insert(id);

        tokio::task::yield_now().await;

        let row = self.inner.tables.packages.read().get(&id).cloned();
        if let Some(p) = &row {
            self.packages.insert(id, p.clone());
        }
        debug!(found = row.is_some(), "package row locked");
        Ok(row)
    }

    async fn set_assigned(
        &mut self,
        package_id: PackageId,
        deliverer_id: DelivererId,
    ) -> anyhow::Result<Package> {
        self.ensure_open()?;
        let deliverer_exists = self.deliverers.contains_key(&deliverer_id)
            || self
                .inner
                .tables
                .deliverers
                .read()
                .contains_key(&deliverer_id);
        ensure!(deliverer_exists, "deliverer {deliverer_id} does not exist");

        let package = self
            .packages
            .get_mut(&package_id)
            .with_context(|| format!("package {package_id} is not locked by this transaction"))?;
        ensure!(
            package.status == PackageStatus::Pending,
            "package {package_id} is {}, expected pending",
            package.status
        );

        package.deliverer_id = Some(deliverer_id);
        package.status = PackageStatus::Assigned;
        Ok(package.clone())
    }

    async fn increment_capacity(&mut self, deliverer_id: DelivererId) -> anyhow::Result<Deliverer> {
        self.ensure_open()?;
        let deliverer = self
            .deliverers
            .get_mut(&deliverer_id)
            .with_context(|| format!("deliverer {deliverer_id} is not locked by this transaction"))?;
        ensure!(
            deliverer.has_free_slot(),
            "deliverer {deliverer_id} already at max capacity {}",
            deliverer.max_capacity
        );

        deliverer.current_capacity += 1;
        Ok(deliverer.clone())
    }

    async fn commit(&mut self) -> anyhow::Result<()> {
        self.ensure_open()?;
        {
            let mut deliverers = self.inner.tables.deliverers.write();
            let mut packages = self.inner.tables.packages.write();
            for (id, d) in self.deliverers.drain() {
                deliverers.insert(id, d);
            }
            for (id, p) in self.packages.drain() {
                packages.insert(id, p);
            }
        }
        self.release();
        Ok(())
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        if !self.finished {
            self.release();
        }
        Ok(())
    }
}
