use anyhow::{Context, Result};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, warn};

use super::{Crop, CropArea, CropAreaSource};
use crate::{raster::cdl_table, raster::RASTER_SRID, vector::STATES_TABLE};

/// Country code selecting the states the job reports on.
pub const COUNTRY_CODE: &str = "US";

/// Per (state, crop) crop area and state area in hectares for one year's
/// raster table. `$1` is the country code, `$2` the crop codes.
pub fn crop_area_sql(year: u16) -> String {
    let raster = cdl_table(year);
    format!(
        r#"
WITH state_area AS (
    SELECT
        s.name AS state,
        ST_Transform(s.geometry, {srid}) AS geom,
        COALESCE(ST_Area(ST_Transform(s.geometry, {srid})) / 10000.0, 0) AS state_area_ha
    FROM {states} s
    WHERE s.iso_a2 = $1
),
crop_cells AS (
    SELECT
        sa.state,
        d.val::int AS crop_code,
        ST_Area(ST_Intersection(sa.geom, d.geom)) / 10000.0 AS area_ha
    FROM {raster} r
    JOIN state_area sa ON ST_Intersects(r.rast, sa.geom)
    CROSS JOIN LATERAL ST_DumpAsPolygons(r.rast, 1) AS d
    WHERE d.val::int = ANY($2)
      AND ST_Intersects(d.geom, sa.geom)
),
crop_summary AS (
    SELECT state, crop_code, SUM(area_ha) AS crop_area_ha
    FROM crop_cells
    GROUP BY state, crop_code
)
SELECT
    cs.state AS state,
    cs.crop_code AS crop_code,
    cs.crop_area_ha::float8 AS crop_area_ha,
    sa.state_area_ha::float8 AS state_area_ha
FROM crop_summary cs
JOIN state_area sa ON sa.state = cs.state
"#,
        srid = RASTER_SRID,
        states = STATES_TABLE,
        raster = raster,
    )
}

fn crop_area_from_row(row: &PgRow) -> Result<CropArea> {
    let code: i32 = row.try_get("crop_code")?;
    Ok(CropArea {
        state: row.try_get("state")?,
        crop: Crop::from_code(code).with_context(|| format!("unexpected crop code {code}"))?,
        crop_area_ha: row.try_get("crop_area_ha")?,
        state_area_ha: row.try_get("state_area_ha")?,
    })
}

/// Reads crop areas from PostGIS.
#[derive(Debug, Clone)]
pub struct PostgisSource {
    pool: PgPool,
}

impl PostgisSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CropAreaSource for PostgisSource {
    /// Runs inside a transaction that is rolled back when the query fails.
    async fn crop_areas(&self, year: u16) -> Result<Vec<CropArea>> {
        let table = cdl_table(year);
        let mut tx = self
            .pool
            .begin()
            .await
            .context("starting aggregation transaction")?;

        let sql = crop_area_sql(year);
        let fetched = sqlx::query(&sql)
            .bind(COUNTRY_CODE)
            .bind(Crop::codes())
            .fetch_all(&mut *tx)
            .await;

        let rows = match fetched {
            Ok(rows) => rows,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(year, "rollback failed: {}", rb);
                }
                return Err(e).with_context(|| format!("querying crop areas from {table}"));
            }
        };
        tx.commit().await.context("committing aggregation transaction")?;

        debug!(year, rows = rows.len(), "fetched crop areas");
        rows.iter().map(crop_area_from_row).collect()
    }
}
