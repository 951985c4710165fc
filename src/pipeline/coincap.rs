//! CoinCap asset feed and snapshot capture
//!
//! ## API Reference
//!
//! Endpoint: `GET https://api.coincap.io/v2/assets?limit=20`
//! Returns: `{ "data": [ { "id", "symbol", "name", "priceUsd", "marketCapUsd",
//! "changePercent24Hr", ... }, ... ] }`
//!
//! ## Fallback
//!
//! `fetch_snapshot` never fails. Any feed error (network, timeout, bad status,
//! malformed body, missing field, empty list) swaps in `fallback_assets()`, a
//! fixed three-asset dataset, so the downstream layers always have input.

use super::config::FeedConfig;
use super::types::{AssetSnapshotRecord, DataSource, Snapshot};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

#[derive(Debug)]
pub enum FeedError {
    Http(reqwest::Error),
    Status(u16),
    Malformed(String),
    Empty,
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Http(err)
    }
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Http(e) if e.is_timeout() => write!(f, "Feed request timed out: {}", e),
            FeedError::Http(e) => write!(f, "Feed request failed: {}", e),
            FeedError::Status(code) => write!(f, "Feed API error: HTTP {}", code),
            FeedError::Malformed(reason) => write!(f, "Malformed feed response: {}", reason),
            FeedError::Empty => write!(f, "Feed returned no assets"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Source of live asset observations
#[async_trait]
pub trait AssetFeed: Send + Sync {
    async fn fetch_assets(&self) -> Result<Vec<AssetSnapshotRecord>, FeedError>;

    /// Human-readable endpoint for logging
    fn endpoint(&self) -> &str;
}

/// CoinCap `/assets` response envelope
#[derive(Debug, Deserialize)]
struct AssetsResponse {
    data: Vec<AssetSnapshotRecord>,
}

/// Parse a CoinCap `/assets` body.
///
/// A missing `data` key, a record missing a required field, or an empty
/// list is an error.
pub fn parse_assets_response(body: &str) -> Result<Vec<AssetSnapshotRecord>, FeedError> {
    let response: AssetsResponse =
        serde_json::from_str(body).map_err(|e| FeedError::Malformed(e.to_string()))?;

    if response.data.is_empty() {
        return Err(FeedError::Empty);
    }
    Ok(response.data)
}

pub struct CoinCapFeed {
    client: reqwest::Client,
    url: String,
    limit: usize,
    api_key: Option<String>,
}

impl CoinCapFeed {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            limit: config.limit,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl AssetFeed for CoinCapFeed {
    async fn fetch_assets(&self) -> Result<Vec<AssetSnapshotRecord>, FeedError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("limit", self.limit)]);

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        parse_assets_response(&body)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Fixed substitute used whenever the live feed is unavailable
pub fn fallback_assets() -> Vec<AssetSnapshotRecord> {
    vec![
        AssetSnapshotRecord::new("bitcoin", "BTC", "Bitcoin", "65000.50", "1200000000000", "2.5"),
        AssetSnapshotRecord::new("ethereum", "ETH", "Ethereum", "3500.20", "400000000000", "-1.2"),
        AssetSnapshotRecord::new("solana", "SOL", "Solana", "140.00", "60000000000", "5.0"),
    ]
}

/// Capture the current snapshot, falling back to `fallback_assets()` on any failure
pub async fn fetch_snapshot(feed: &dyn AssetFeed) -> Snapshot {
    log::info!("📥 Fetching asset snapshot from {}", feed.endpoint());

    match feed.fetch_assets().await {
        Ok(records) => {
            log::info!("✅ Live data used: {} assets", records.len());
            Snapshot {
                records,
                source: DataSource::Live,
            }
        }
        Err(e) => {
            log::warn!("⚠️  Feed unavailable ({}), fallback data used", e);
            Snapshot {
                records: fallback_assets(),
                source: DataSource::Fallback,
            }
        }
    }
}
