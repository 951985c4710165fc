//! Pipeline Runtime - one full medallion run per invocation
//!
//! Fetches a market snapshot, persists it as a raw batch, then rebuilds the
//! bronze, silver and gold tables. Meant to be invoked by an external
//! scheduler; there is no internal loop or retry.
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Exit status:
//!   0 - run reached DONE (non-fatal stage failures are logged)
//!   1 - run halted (persist failure, or any failure in strict mode)
//!
//! See `PipelineConfig::from_env` for environment variables.

use coinlake::pipeline::{
    coincap::CoinCapFeed,
    config::PipelineConfig,
    engine::PipelineRunner,
    object_store::{LocalObjectStore, ObjectStore},
    sqlite_warehouse::SqliteWarehouse,
    warehouse::Warehouse,
};
use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Pipeline Runtime");

    let config = PipelineConfig::from_env();
    config.validate()?;

    info!("   ├─ Feed: {} (limit {})", config.feed.url, config.feed.limit);
    info!("   ├─ Object store: {}/{}", config.object_store_root.display(), config.bucket);
    info!("   ├─ Warehouse: {} (dataset {})", config.warehouse_dir.display(), config.dataset);
    info!("   ├─ Failure mode: {}", config.failure_mode.as_str());
    info!("   └─ Cast policy: {}", config.cast_policy.as_str());

    let store: Arc<dyn ObjectStore> =
        Arc::new(LocalObjectStore::new(&config.object_store_root, &config.bucket)?);
    let warehouse: Arc<dyn Warehouse> =
        Arc::new(SqliteWarehouse::open(&config.warehouse_dir, store.clone())?);
    let feed = Arc::new(CoinCapFeed::new(&config.feed)?);

    let runner = PipelineRunner::new(feed, store, warehouse, config);
    let report = runner.run().await;

    if let Some(stage) = report.halted_at {
        error!("❌ Pipeline halted at {} stage", stage);
        std::process::exit(report.exit_code());
    }

    info!("✅ Pipeline finished");
    Ok(())
}
