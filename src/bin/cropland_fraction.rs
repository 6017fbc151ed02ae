use anyhow::Result;
use cropland::{logging, pipeline};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    info!("startup");

    let (cfg, pool) = pipeline::bootstrap().await;
    let result = pipeline::cropland_fraction(&cfg, &pool).await;
    pool.close().await;

    let rows = result?;
    info!(rows, path = %cfg.output_path.display(), "all done");
    Ok(())
}
