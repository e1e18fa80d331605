//! Integration tests against PostgreSQL.
//!
//! Each test gets a migrated database from `support::PgTestDb` (a throwaway
//! container, or `DATABASE_URL` when set) and seeds its own uniquely named
//! zone, so runs against a shared database do not interfere.

mod support;

use std::time::Duration;

use uuid::Uuid;

use records::model::{NewDeliverer, NewPackage, PackageStatus, Zone};
use records::pg::{PgRecordStore, PgStoreConfig};
use records::store::RecordStore;
use support::PgTestDb;

async fn unique_zone(store: &PgRecordStore) -> Zone {
    store
        .insert_zone(&format!("zone-{}", Uuid::new_v4()), "Casablanca")
        .await
        .expect("insert zone")
}

fn tracking() -> String {
    format!("TRK-{}", Uuid::new_v4())
}

#[tokio::test]
async fn locked_assignment_commits_both_rows() -> anyhow::Result<()> {
    let db = PgTestDb::start().await?;
    let store = PgRecordStore::new(db.pool.clone(), PgStoreConfig::default());
    let zone = unique_zone(&store).await;
    let d = store
        .insert_deliverer(&NewDeliverer::in_zone("Ahmed", zone.id, 5))
        .await?;
    let p = store.insert_package(&NewPackage::new(tracking(), zone.id)).await?;

    let mut tx = store.begin().await?;
    let locked = tx.lock_deliverer(d.id).await?.expect("deliverer exists");
    assert_eq!(locked.current_capacity, 0);
    let pkg = tx.lock_package(p.id).await?.expect("package exists");
    assert_eq!(pkg.status, PackageStatus::Pending);

    let pkg = tx.set_assigned(p.id, d.id).await?;
    let del = tx.increment_capacity(d.id).await?;
    tx.commit().await?;

    assert_eq!(pkg.status, PackageStatus::Assigned);
    assert_eq!(pkg.deliverer_id, Some(d.id));
    assert_eq!(del.current_capacity, 1);

    let reloaded = store.fetch_package(p.id).await?.expect("package exists");
    assert!(reloaded.is_consistent());
    assert_eq!(reloaded.deliverer_id, Some(d.id));

    Ok(())
}

#[tokio::test]
async fn rollback_leaves_rows_untouched() -> anyhow::Result<()> {
    let db = PgTestDb::start().await?;
    let store = PgRecordStore::new(db.pool.clone(), PgStoreConfig::default());
    let zone = unique_zone(&store).await;
    let d = store
        .insert_deliverer(&NewDeliverer::in_zone("Sara", zone.id, 2))
        .await?;
    let p = store.insert_package(&NewPackage::new(tracking(), zone.id)).await?;

    let mut tx = store.begin().await?;
    tx.lock_deliverer(d.id).await?;
    tx.lock_package(p.id).await?;
    tx.set_assigned(p.id, d.id).await?;
    tx.increment_capacity(d.id).await?;
    tx.rollback().await?;

    let pkg = store.fetch_package(p.id).await?.expect("package exists");
    assert_eq!(pkg.status, PackageStatus::Pending);
    let del = store.fetch_deliverer(d.id).await?.expect("deliverer exists");
    assert_eq!(del.current_capacity, 0);

    Ok(())
}

#[tokio::test]
async fn missing_rows_lock_as_none() -> anyhow::Result<()> {
    let db = PgTestDb::start().await?;
    let store = PgRecordStore::new(db.pool.clone(), PgStoreConfig::default());

    let mut tx = store.begin().await?;
    assert!(tx.lock_deliverer(i64::MAX).await?.is_none());
    assert!(tx.lock_package(i64::MAX).await?.is_none());
    tx.rollback().await?;

    Ok(())
}

#[tokio::test]
async fn package_lock_before_deliverer_lock_is_refused() -> anyhow::Result<()> {
    let db = PgTestDb::start().await?;
    let store = PgRecordStore::new(db.pool.clone(), PgStoreConfig::default());
    let zone = unique_zone(&store).await;
    let d = store
        .insert_deliverer(&NewDeliverer::in_zone("Omar", zone.id, 2))
        .await?;
    let p = store.insert_package(&NewPackage::new(tracking(), zone.id)).await?;

    let mut tx = store.begin().await?;
    tx.lock_package(p.id).await?;
    let err = tx.lock_deliverer(d.id).await.unwrap_err();
    assert!(err.to_string().contains("lock order violation"));
    tx.rollback().await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lock_timeout_aborts_the_waiter() -> anyhow::Result<()> {
    let db = PgTestDb::start().await?;
    let store = PgRecordStore::new(
        db.pool.clone(),
        PgStoreConfig {
            lock_timeout_ms: 100,
            statement_timeout_ms: 0,
        },
    );
    let zone = unique_zone(&store).await;
    let d = store
        .insert_deliverer(&NewDeliverer::in_zone("Hold", zone.id, 2))
        .await?;

    let mut holder = store.begin().await?;
    holder.lock_deliverer(d.id).await?;

    let mut waiter = store.begin().await?;
    let res = tokio::time::timeout(Duration::from_secs(5), waiter.lock_deliverer(d.id)).await;
    assert!(matches!(res, Ok(Err(_))), "waiter should fail on lock_timeout");
    waiter.rollback().await?;

    holder.rollback().await?;
    Ok(())
}

#[tokio::test]
async fn zone_scan_lists_every_deliverer_in_the_zone() -> anyhow::Result<()> {
    let db = PgTestDb::start().await?;
    let store = PgRecordStore::new(db.pool.clone(), PgStoreConfig::default());
    let zone = unique_zone(&store).await;
    let other = unique_zone(&store).await;
    let open = store
        .insert_deliverer(&NewDeliverer::in_zone("open", zone.id, 3).with_load(1))
        .await?;
    let full = store
        .insert_deliverer(&NewDeliverer::in_zone("full", zone.id, 2).with_load(2))
        .await?;
    let off = store
        .insert_deliverer(&NewDeliverer::in_zone("off", zone.id, 2).unavailable())
        .await?;
    store
        .insert_deliverer(&NewDeliverer::in_zone("elsewhere", other.id, 2))
        .await?;

    let ids: Vec<i64> = store
        .deliverers_in_zone(zone.id)
        .await?
        .iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec![open.id, full.id, off.id]);

    store.set_availability(open.id, false).await?;
    assert_eq!(store.deliverers_in_zone(zone.id).await?.len(), 3);

    Ok(())
}

#[tokio::test]
async fn schema_rejects_capacity_overflow() -> anyhow::Result<()> {
    let db = PgTestDb::start().await?;
    let store = PgRecordStore::new(db.pool.clone(), PgStoreConfig::default());
    let zone = unique_zone(&store).await;
    let d = store
        .insert_deliverer(&NewDeliverer::in_zone("Edge", zone.id, 1).with_load(1))
        .await?;

    let res = sqlx::query("UPDATE deliverers SET current_capacity = 2 WHERE id = $1")
        .bind(d.id)
        .execute(store.pool())
        .await;
    assert!(res.is_err(), "CHECK constraint must reject current > max");

    Ok(())
}
