// src/vector.rs

use anyhow::{Context, Result};
use geo_types::MultiPolygon;
use shapefile::dbase::{FieldValue, Record};
use shapefile::Polygon;
use sqlx::PgPool;
use std::{fs, path::Path};
use tokio::time::Instant;
use tracing::{error, info, warn};
use wkt::ToWkt;

use crate::config::DEFAULT_SHAPEFILE_SRID;

pub const STATES_TABLE: &str = "us_states";
pub const TARGET_SRID: i32 = 4326;

/// One state boundary as read from the shapefile, geometry still in the
/// shapefile's own SRID.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub name: String,
    pub iso_a2: Option<String>,
    pub geometry_wkt: String,
}

/// Read every polygon and its attribute record from `path`.
pub fn read_states(path: &Path) -> Result<Vec<StateRecord>> {
    let shapes = shapefile::read_as::<_, Polygon, Record>(path)
        .with_context(|| format!("reading shapefile {}", path.display()))?;

    let mut states = Vec::with_capacity(shapes.len());
    for (idx, (polygon, record)) in shapes.into_iter().enumerate() {
        match state_from_shape(polygon, &record) {
            Some(state) => states.push(state),
            None => warn!(idx, path = %path.display(), "skipping shape without a name"),
        }
    }
    Ok(states)
}

/// `None` when the record carries no usable `name`.
pub fn state_from_shape(polygon: Polygon, record: &Record) -> Option<StateRecord> {
    let name = text_field(record, "name")?;
    let iso_a2 = text_field(record, "iso_a2");
    let geometry: MultiPolygon<f64> = polygon.into();
    Some(StateRecord {
        name,
        iso_a2,
        geometry_wkt: geometry.wkt_string(),
    })
}

fn text_field(record: &Record, field: &str) -> Option<String> {
    let raw = match record.get(field)? {
        FieldValue::Character(Some(s)) => s.as_str(),
        FieldValue::Memo(s) => s.as_str(),
        _ => return None,
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Replace `us_states` with `states`, reprojected from `source_srid` to
/// EPSG:4326 by PostGIS. Drop, create, insert and index happen in one
/// transaction. Returns the number of rows written.
#[tracing::instrument(level = "info", skip(pool, states), fields(rows = states.len()))]
pub async fn replace_states(pool: &PgPool, states: &[StateRecord], source_srid: i32) -> Result<u64> {
    let mut tx = pool.begin().await.context("starting vector load transaction")?;

    sqlx::query(&format!("DROP TABLE IF EXISTS {STATES_TABLE}"))
        .execute(&mut *tx)
        .await
        .context("dropping previous states table")?;
    sqlx::query(&format!(
        "CREATE TABLE {STATES_TABLE} (
            name TEXT NOT NULL,
            iso_a2 TEXT,
            geometry geometry(MultiPolygon, {TARGET_SRID})
        )"
    ))
    .execute(&mut *tx)
    .await
    .context("creating states table")?;

    let insert = format!(
        "INSERT INTO {STATES_TABLE} (name, iso_a2, geometry)
         VALUES ($1, $2, ST_Multi(ST_Transform(ST_GeomFromText($3, $4), {TARGET_SRID})))"
    );
    let mut written = 0u64;
    for state in states {
        written += sqlx::query(&insert)
            .bind(&state.name)
            .bind(&state.iso_a2)
            .bind(&state.geometry_wkt)
            .bind(source_srid)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting state {}", state.name))?
            .rows_affected();
    }

    sqlx::query(&format!(
        "CREATE INDEX {STATES_TABLE}_geometry_idx ON {STATES_TABLE} USING GIST (geometry)"
    ))
    .execute(&mut *tx)
    .await
    .context("indexing states geometry")?;

    tx.commit().await.context("committing vector load")?;
    Ok(written)
}

/// True when `.prj` WKT names the WGS 84 datum.
pub fn prj_is_wgs84(prj: &str) -> bool {
    let upper = prj.to_uppercase();
    ["WGS_1984", "WGS 84", "WGS84"]
        .iter()
        .any(|name| upper.contains(name))
}

/// Describe a mismatch between the `.prj` next to `shp` and `source_srid`.
/// Only the WGS 84 default is checked; an explicit SRID is trusted.
pub fn projection_mismatch(shp: &Path, source_srid: i32) -> Option<String> {
    if source_srid != DEFAULT_SHAPEFILE_SRID {
        return None;
    }
    let prj_path = shp.with_extension("prj");
    let prj = fs::read_to_string(&prj_path).ok()?;
    if prj_is_wgs84(&prj) {
        None
    } else {
        Some(format!(
            "{} does not name WGS 84 but geometries will be tagged EPSG:{}; set SHAPEFILE_SRID",
            prj_path.display(),
            source_srid
        ))
    }
}

/// Read the shapefile and replace the states table.
pub async fn load_states(pool: &PgPool, path: &Path, source_srid: i32) -> Result<u64> {
    if let Some(mismatch) = projection_mismatch(path, source_srid) {
        warn!("{}", mismatch);
    }
    let states = read_states(path)?;
    info!(path = %path.display(), count = states.len(), "read state shapes");
    replace_states(pool, &states, source_srid).await
}

/// Vector stage of the loader: failures are logged and swallowed so the
/// raster stage still runs.
pub async fn run(pool: &PgPool, path: &Path, source_srid: i32) {
    let start = Instant::now();
    match load_states(pool, path, source_srid).await {
        Ok(rows) => info!(rows, elapsed = ?start.elapsed(), "vector data loaded successfully"),
        Err(e) => error!("an error occurred while loading vector data: {:#}", e),
    }
}
