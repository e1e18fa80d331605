/* =========================
Row mapping + conversions
========================= */

use anyhow::{Context, anyhow};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::model::{Deliverer, Package, PackageStatus, Zone};

pub(crate) fn row_to_zone(r: &PgRow) -> anyhow::Result<Zone> {
    Ok(Zone {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        city: r.try_get("city")?,
        created_at: r.try_get("created_at")?,
    })
}

pub(crate) fn row_to_deliverer(r: &PgRow) -> anyhow::Result<Deliverer> {
    let id: i64 = r.try_get("id")?;

    Ok(Deliverer {
        id,
        name: r.try_get("name")?,
        max_capacity: i32_to_u32(r.try_get("max_capacity")?)
            .with_context(|| format!("deliverer {id}: invalid max_capacity"))?,
        current_capacity: i32_to_u32(r.try_get("current_capacity")?)
            .with_context(|| format!("deliverer {id}: invalid current_capacity"))?,
        is_available: r.try_get("is_available")?,
        current_zone_id: r.try_get("current_zone_id")?,
        created_at: r.try_get("created_at")?,
    })
}

pub(crate) fn row_to_package(r: &PgRow) -> anyhow::Result<Package> {
    let id: i64 = r.try_get("id")?;
    let status_str: String = r.try_get("status")?;
    let status: PackageStatus = status_str
        .parse()
        .with_context(|| format!("package {id}: invalid status"))?;

    Ok(Package {
        id,
        tracking_number: r.try_get("tracking_number")?,
        zone_id: r.try_get("zone_id")?,
        deliverer_id: r.try_get("deliverer_id")?,
        status,
        created_at: r.try_get("created_at")?,
    })
}

/* =========================
Numeric safety helpers
========================= */

pub(crate) fn i32_to_u32(v: i32) -> anyhow::Result<u32> {
    if v < 0 {
        return Err(anyhow!("negative i32 where u32 expected: {v}"));
    }
    Ok(v as u32)
}

pub(crate) fn u32_to_i32(v: u32) -> anyhow::Result<i32> {
    if v > i32::MAX as u32 {
        return Err(anyhow!("u32 too large for i32: {v}"));
    }
    Ok(v as i32)
}
