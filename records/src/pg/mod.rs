//! PostgreSQL-backed `RecordStore`.
//!
//! Dispatch transactions run at READ COMMITTED and take `FOR UPDATE` row
//! locks; correctness comes from the locks, not from snapshot isolation.
//! Lock waits and statements are bounded by `PgStoreConfig`, and a
//! transaction aborted by either timeout is rolled back by the server.
pub mod schema;

mod convert;

use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use common::logger::warn_if_slow;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, instrument, warn};

use crate::model::{
    Deliverer, DelivererId, NewDeliverer, NewPackage, Package, PackageId, Zone, ZoneId,
};
use crate::store::{RecordStore, StoreTx};
use convert::{row_to_deliverer, row_to_package, row_to_zone, u32_to_i32};

/// Server-side limits applied to every dispatch transaction.
#[derive(Clone, Debug)]
pub struct PgStoreConfig {
    /// `lock_timeout` in ms; 0 leaves the server default.
    pub lock_timeout_ms: u64,
    /// `statement_timeout` in ms; 0 leaves the server default.
    pub statement_timeout_ms: u64,
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            statement_timeout_ms: 10_000,
        }
    }
}

pub struct PgRecordStore {
    pool: PgPool,
    cfg: PgStoreConfig,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, cfg: PgStoreConfig) -> Self {
        Self { pool, cfg }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn insert_zone(&self, name: &str, city: &str) -> anyhow::Result<Zone> {
        let row = sqlx::query(
            r#"
INSERT INTO zones (name, city)
VALUES ($1, $2)
RETURNING id, name, city, created_at;
"#,
        )
        .bind(name)
        .bind(city)
        .fetch_one(&self.pool)
        .await?;

        row_to_zone(&row)
    }

    pub async fn insert_deliverer(&self, new: &NewDeliverer) -> anyhow::Result<Deliverer> {
        new.validate()?;

        let row = sqlx::query(
            r#"
INSERT INTO deliverers (name, max_capacity, current_capacity, is_available, current_zone_id)
VALUES ($1, $2, $3, $4, $5)
RETURNING id, name, max_capacity, current_capacity, is_available, current_zone_id, created_at;
"#,
        )
        .bind(&new.name)
        .bind(u32_to_i32(new.max_capacity)?)
        .bind(u32_to_i32(new.current_capacity)?)
        .bind(new.is_available)
        .bind(new.current_zone_id)
        .fetch_one(&self.pool)
        .await?;

        row_to_deliverer(&row)
    }

    pub async fn insert_package(&self, new: &NewPackage) -> anyhow::Result<Package> {
        let row = sqlx::query(
            r#"
INSERT INTO packages (tracking_number, zone_id)
VALUES ($1, $2)
RETURNING id, tracking_number, zone_id, deliverer_id, status, created_at;
"#,
        )
        .bind(&new.tracking_number)
        .bind(new.zone_id)
        .fetch_one(&self.pool)
        .await?;

        row_to_package(&row)
    }

    /// External availability toggle; serializes with dispatch via the row lock.
    pub async fn set_availability(&self, id: DelivererId, available: bool) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
UPDATE deliverers
SET is_available = $1, updated_at = NOW()
WHERE id = $2;
"#,
        )
        .bind(available)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            bail!("deliverer {id} not found");
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self), target = "store", level = "debug")]
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open dispatch transaction")?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;

        if self.cfg.lock_timeout_ms > 0 {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", self.cfg.lock_timeout_ms))
                .execute(&mut *tx)
                .await?;
        }

        if self.cfg.statement_timeout_ms > 0 {
            sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                .bind(format!("{}ms", self.cfg.statement_timeout_ms))
                .execute(&mut *tx)
                .await?;
        }

        Ok(Box::new(PgTx {
            tx: Some(tx),
            package_locked: false,
        }))
    }

    async fn fetch_package(&self, id: PackageId) -> anyhow::Result<Option<Package>> {
        let row = warn_if_slow("db_fetch_package", Duration::from_millis(100), async {
            sqlx::query(
                r#"
SELECT id, tracking_number, zone_id, deliverer_id, status, created_at
FROM packages
WHERE id = $1;
"#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        })
        .await
        .context("package fetch failed")?;

        row.as_ref().map(row_to_package).transpose()
    }

    async fn fetch_deliverer(&self, id: DelivererId) -> anyhow::Result<Option<Deliverer>> {
        let row = sqlx::query(
            r#"
SELECT id, name, max_capacity, current_capacity, is_available, current_zone_id, created_at
FROM deliverers
WHERE id = $1;
"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("deliverer fetch failed")?;

        row.as_ref().map(row_to_deliverer).transpose()
    }

    /// Every deliverer in the zone, full or off shift included.
    async fn deliverers_in_zone(&self, zone_id: ZoneId) -> anyhow::Result<Vec<Deliverer>> {
        let rows = warn_if_slow("db_deliverers_in_zone", Duration::from_millis(200), async {
            sqlx::query(
                r#"
SELECT id, name, max_capacity, current_capacity, is_available, current_zone_id, created_at
FROM deliverers
WHERE current_zone_id = $1
ORDER BY id ASC;
"#,
            )
            .bind(zone_id)
            .fetch_all(&self.pool)
            .await
        })
        .await
        .context("zone deliverer scan failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_deliverer(&r) {
                Ok(d) => out.push(d),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the scan
                    warn!(error = %e, zone_id, "skipping malformed deliverer row");
                }
            }
        }

        Ok(out)
    }
}

/// A live `FOR UPDATE` transaction.
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
    package_locked: bool,
}

impl PgTx {
    fn conn(&mut self) -> anyhow::Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| anyhow!("transaction already finished"))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    #[instrument(skip(self), target = "store", level = "debug")]
    async fn lock_deliverer(&mut self, id: DelivererId) -> anyhow::Result<Option<Deliverer>> {
        if self.package_locked {
            bail!("lock order violation: deliverer {id} requested after a package lock");
        }

        let conn = self.conn()?;
        let row = warn_if_slow("db_lock_deliverer", Duration::from_millis(100), async move {
            sqlx::query(
                r#"
SELECT id, name, max_capacity, current_capacity, is_available, current_zone_id, created_at
FROM deliverers
WHERE id = $1
FOR UPDATE;
"#,
            )
            .bind(id)
            .fetch_optional(conn)
            .await
            .with_context(|| format!("failed to lock deliverer {id}"))
        })
        .await?;

        debug!(found = row.is_some(), "deliverer row locked");
        row.as_ref().map(row_to_deliverer).transpose()
    }

    #[instrument(skip(self), target = "store", level = "debug")]
    async fn lock_package(&mut self, id: PackageId) -> anyhow::Result<Option<Package>> {
        self.package_locked = true;

        let conn = self.conn()?;
        let row = warn_if_slow("db_lock_package", Duration::from_millis(100), async move {
            sqlx::query(
                r#"
SELECT id, tracking_number, zone_id, deliverer_id, status, created_at
FROM packages
WHERE id = $1
FOR UPDATE;
"#,
            )
            .bind(id)
            .fetch_optional(conn)
            .await
            .with_context(|| format!("failed to lock package {id}"))
        })
        .await?;

        debug!(found = row.is_some(), "package row locked");
        row.as_ref().map(row_to_package).transpose()
    }

    async fn set_assigned(
        &mut self,
        package_id: PackageId,
        deliverer_id: DelivererId,
    ) -> anyhow::Result<Package> {
        let row = sqlx::query(
            r#"
UPDATE packages
SET deliverer_id = $1, status = 'assigned', updated_at = NOW()
WHERE id = $2 AND status = 'pending'
RETURNING id, tracking_number, zone_id, deliverer_id, status, created_at;
"#,
        )
        .bind(deliverer_id)
        .bind(package_id)
        .fetch_optional(self.conn()?)
        .await
        .with_context(|| format!("failed to assign package {package_id}"))?;

        match row {
            Some(r) => row_to_package(&r),
            None => bail!("package {package_id} was not pending at write time"),
        }
    }

    async fn increment_capacity(&mut self, deliverer_id: DelivererId) -> anyhow::Result<Deliverer> {
        let row = sqlx::query(
            r#"
UPDATE deliverers
SET current_capacity = current_capacity + 1, updated_at = NOW()
WHERE id = $1 AND current_capacity < max_capacity
RETURNING id, name, max_capacity, current_capacity, is_available, current_zone_id, created_at;
"#,
        )
        .bind(deliverer_id)
        .fetch_optional(self.conn()?)
        .await
        .with_context(|| format!("failed to increment capacity of deliverer {deliverer_id}"))?;

        match row {
            Some(r) => row_to_deliverer(&r),
            None => bail!("deliverer {deliverer_id} has no free slot at write time"),
        }
    }

    async fn commit(&mut self) -> anyhow::Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| anyhow!("transaction already finished"))?;
        tx.commit()
            .await
            .context("failed to commit dispatch transaction")
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback()
                .await
                .context("failed to roll back dispatch transaction")?;
        }
        Ok(())
    }
}
