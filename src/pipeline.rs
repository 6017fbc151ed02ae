// src/pipeline.rs

use anyhow::Result;
use sqlx::PgPool;
use tokio::time::Instant;
use tracing::{error, info};

use crate::{aggregate, config::Config, db, export, raster, vector};

/// Read the config and open the database, or log why not and exit(1).
pub async fn bootstrap() -> (Config, PgPool) {
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    match db::connect(&cfg.db).await {
        Ok(pool) => (cfg, pool),
        Err(e) => {
            error!("an error occurred while connecting to the PostgreSQL database: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Vector load then raster load. Neither stage's failure stops the other.
pub async fn load_data(cfg: &Config, pool: &PgPool) -> raster::RasterSummary {
    vector::run(pool, &cfg.shapefile_path, cfg.shapefile_srid).await;
    raster::run(cfg).await
}

/// Aggregate every configured year and export the result table.
pub async fn cropland_fraction(cfg: &Config, pool: &PgPool) -> Result<usize> {
    let start = Instant::now();
    let source = aggregate::PostgisSource::new(pool.clone());
    let table = aggregate::run_years(&source, &cfg.cdl_years).await?;

    info!("first rows:\n{}", table.preview(5)?);

    let rows = export::export(&table, &cfg.output_path, cfg.parquet_path.as_deref())?;
    info!(rows, elapsed = ?start.elapsed(), "cropland fraction export finished");
    Ok(rows)
}
