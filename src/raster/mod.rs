// src/raster/mod.rs

pub mod command;

use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::{Config, DbConfig};
pub use command::{CommandSpec, PipelineSpec, ProcessRunner, TokioRunner};

/// SRID the CDL GeoTIFFs are stored in (CONUS Albers).
pub const RASTER_SRID: i32 = 5070;
pub const TILE_SIZE: &str = "500x500";

/// `cdl_<year>`, the table one year's raster is loaded into.
pub fn cdl_table(year: u16) -> String {
    format!("cdl_{year}")
}

/// `<base>/<year>_30m_cdls/<year>_30m_cdls.tif`
pub fn cdl_path(base: &Path, year: u16) -> PathBuf {
    let stem = format!("{year}_30m_cdls");
    base.join(&stem).join(format!("{stem}.tif"))
}

/// raster2pgsql: drop and recreate the table, tile, index, add constraints,
/// vacuum analyze afterwards.
pub fn raster2pgsql_command(program: &str, tif: &Path, year: u16) -> CommandSpec {
    CommandSpec::new(program)
        .arg("-d")
        .args(["-s".to_string(), RASTER_SRID.to_string()])
        .args(["-I", "-C", "-M"])
        .args(["-t", TILE_SIZE])
        .arg(tif.display().to_string())
        .arg(format!("public.{}", cdl_table(year)))
}

/// psql reading SQL from stdin, stopping on the first error. The password
/// travels in `PGPASSWORD`, never on the command line.
pub fn psql_command(program: &str, db: &DbConfig) -> CommandSpec {
    CommandSpec::new(program)
        .args(["-q", "-v", "ON_ERROR_STOP=1"])
        .args(["-d", db.name.as_str()])
        .args(["-U", db.user.as_str()])
        .args(["-h", db.host.as_str()])
        .args(["-p".to_string(), db.port.to_string()])
        .env("PGPASSWORD", db.password.as_str())
}

pub fn pipeline_for_year(cfg: &Config, year: u16) -> PipelineSpec {
    let tif = cdl_path(&cfg.cdl_base_path, year);
    PipelineSpec {
        producer: raster2pgsql_command(&cfg.raster2pgsql_bin, &tif, year),
        consumer: psql_command(&cfg.psql_bin, &cfg.db),
    }
}

/// Which years made it into the database.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RasterSummary {
    pub loaded: Vec<u16>,
    pub failed: Vec<u16>,
}

/// Load every configured year in order. A failing year is logged and the
/// loop moves on.
pub async fn load_years<R: ProcessRunner>(runner: &R, cfg: &Config) -> RasterSummary {
    let mut summary = RasterSummary::default();

    for &year in &cfg.cdl_years {
        let spec = pipeline_for_year(cfg, year);
        let start = Instant::now();
        info!(year, table = %cdl_table(year), pipeline = %spec, "loading raster");

        match runner.run_pipeline(&spec).await {
            Ok(()) => {
                info!(year, elapsed = ?start.elapsed(), "raster data loaded successfully");
                summary.loaded.push(year);
            }
            Err(e) => {
                error!(year, "an error occurred while loading raster data: {:#}", e);
                summary.failed.push(year);
            }
        }
    }

    summary
}

/// Raster stage of the loader, using real processes.
pub async fn run(cfg: &Config) -> RasterSummary {
    let summary = load_years(&TokioRunner, cfg).await;
    info!(
        loaded = summary.loaded.len(),
        failed = summary.failed.len(),
        "raster load finished"
    );
    summary
}
