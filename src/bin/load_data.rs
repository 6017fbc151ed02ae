use cropland::{logging, pipeline};
use tracing::info;

#[tokio::main]
async fn main() {
    logging::init();
    info!("startup");

    let (cfg, pool) = pipeline::bootstrap().await;
    let summary = pipeline::load_data(&cfg, &pool).await;
    pool.close().await;

    info!(loaded = ?summary.loaded, failed = ?summary.failed, "load finished");
}
