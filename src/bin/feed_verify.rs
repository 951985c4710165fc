//! Feed connectivity check
//!
//! Calls the configured asset feed once and reports whether a pipeline run
//! right now would use live data or the fallback dataset. Writes nothing.
//!
//! Usage:
//!   cargo run --bin feed_verify
//!
//! Exit status is 0 when live data is available, 2 when the fallback would be used.

use coinlake::pipeline::{
    coincap::{fallback_assets, AssetFeed, CoinCapFeed},
    config::PipelineConfig,
    numeric::parse_float64,
    types::PriceCategory,
};
use dotenv::dotenv;
use log::{info, warn};
use std::time::Instant;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = PipelineConfig::from_env();
    config.validate()?;

    info!("🔍 Probing feed: {}", config.feed.url);
    info!("   ├─ Limit: {}", config.feed.limit);
    info!("   ├─ Timeout: {:?}", config.feed.timeout);
    info!("   └─ API key: {}", if config.feed.api_key.is_some() { "set" } else { "not set" });

    let feed = CoinCapFeed::new(&config.feed)?;
    let started = Instant::now();

    match feed.fetch_assets().await {
        Ok(records) => {
            info!("✅ LIVE: {} assets in {:?}", records.len(), started.elapsed());

            for record in &records {
                let price = parse_float64(record.price_usd());
                let (symbol, name) = (record.symbol(), record.name());
                match price {
                    Some(p) => info!(
                        "   {:<6} {:<20} ${:>14.4}  {}",
                        symbol,
                        name,
                        p,
                        PriceCategory::classify(price)
                    ),
                    None => warn!(
                        "   {:<6} {:<20} unparseable priceUsd '{}'",
                        symbol,
                        name,
                        record.price_usd()
                    ),
                }
            }
            Ok(())
        }
        Err(e) => {
            warn!("⚠️  FALLBACK: feed unavailable after {:?}: {}", started.elapsed(), e);
            warn!(
                "   A pipeline run now would persist {} synthetic assets",
                fallback_assets().len()
            );
            std::process::exit(2);
        }
    }
}
