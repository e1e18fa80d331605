use sqlx::PgPool;

/// Create the dispatch tables if they do not exist.
///
/// CHECK constraints mirror the engine's invariants so a bug elsewhere
/// fails loudly at the database instead of corrupting capacity figures.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    // Zones
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS zones (
  id BIGSERIAL PRIMARY KEY,
  name TEXT NOT NULL UNIQUE,
  city TEXT NOT NULL DEFAULT 'Casablanca',
  created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#,
    )
    .execute(pool)
    .await?;

    // Deliverers
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS deliverers (
  id BIGSERIAL PRIMARY KEY,
  name TEXT NOT NULL,
  max_capacity INTEGER NOT NULL DEFAULT 10 CHECK (max_capacity > 0),
  current_capacity INTEGER NOT NULL DEFAULT 0,
  is_available BOOLEAN NOT NULL DEFAULT TRUE,
  current_zone_id BIGINT REFERENCES zones(id),
  created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
  updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
  CHECK (current_capacity >= 0 AND current_capacity <= max_capacity)
);
"#,
    )
    .execute(pool)
    .await?;

    // Packages
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS packages (
  id BIGSERIAL PRIMARY KEY,
  tracking_number TEXT NOT NULL UNIQUE,
  zone_id BIGINT NOT NULL REFERENCES zones(id),
  deliverer_id BIGINT REFERENCES deliverers(id),
  status TEXT NOT NULL DEFAULT 'pending'
    CHECK (status IN ('pending', 'assigned', 'in_transit', 'delivered', 'cancelled')),
  created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
  updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
  CHECK ((deliverer_id IS NULL) = (status IN ('pending', 'cancelled')))
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_deliverers_zone ON deliverers(current_zone_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_packages_zone ON packages(zone_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_packages_deliverer ON packages(deliverer_id);"#)
        .execute(pool)
        .await?;

    Ok(())
}
