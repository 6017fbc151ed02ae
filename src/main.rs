use anyhow::Result;
use cropland::{logging, pipeline};
use tokio::time::Instant;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    logging::init();
    info!("startup");
    let start = Instant::now();

    // ─── 2) config + connection (exits on failure) ───────────────────
    let (cfg, pool) = pipeline::bootstrap().await;
    info!(years = ?cfg.cdl_years, "configured");

    // ─── 3) load states and rasters ──────────────────────────────────
    let summary = pipeline::load_data(&cfg, &pool).await;
    info!(loaded = ?summary.loaded, failed = ?summary.failed, "load finished");

    // ─── 4) aggregate + export ───────────────────────────────────────
    let result = pipeline::cropland_fraction(&cfg, &pool).await;

    // ─── 5) release the pool ─────────────────────────────────────────
    pool.close().await;

    let rows = result?;
    info!(rows, elapsed = ?start.elapsed(), "all done");
    Ok(())
}
