//! Core record types for each medallion layer
//!
//! - `AssetSnapshotRecord` → raw capture (as received, numeric fields as text)
//! - `RefinedRow` → `SLV_assets` (typed)
//! - `SummaryRow` → `GLD_market_summary` (aggregated)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Price above which an asset is categorized as high value (exclusive)
pub const HIGH_VALUE_THRESHOLD_USD: f64 = 1000.0;

/// One observation of a tradable asset, exactly as the feed returned it
///
/// The feed's JSON object is kept as received (key order, extra keys such as
/// `rank` or `supply`, absent optional keys) and is what gets serialized.
/// The six named fields are a validated read-only view over it: `priceUsd`
/// must be a string, `marketCapUsd` and `changePercent24Hr` may be null or
/// missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct AssetSnapshotRecord {
    id: String,
    symbol: String,
    name: String,
    price_usd: String,
    market_cap_usd: Option<String>,
    change_percent_24hr: Option<String>,
    raw: Map<String, Value>,
}

/// Shape every feed record must have
#[derive(Deserialize)]
struct RecordView {
    id: String,
    symbol: String,
    name: String,
    #[serde(rename = "priceUsd")]
    price_usd: String,
    #[serde(rename = "marketCapUsd")]
    market_cap_usd: Option<String>,
    #[serde(rename = "changePercent24Hr")]
    change_percent_24hr: Option<String>,
}

impl TryFrom<Map<String, Value>> for AssetSnapshotRecord {
    type Error = serde_json::Error;

    fn try_from(raw: Map<String, Value>) -> Result<Self, Self::Error> {
        let view: RecordView = serde_json::from_value(Value::Object(raw.clone()))?;
        Ok(Self {
            id: view.id,
            symbol: view.symbol,
            name: view.name,
            price_usd: view.price_usd,
            market_cap_usd: view.market_cap_usd,
            change_percent_24hr: view.change_percent_24hr,
            raw,
        })
    }
}

impl From<AssetSnapshotRecord> for Map<String, Value> {
    fn from(record: AssetSnapshotRecord) -> Self {
        record.raw
    }
}

impl AssetSnapshotRecord {
    /// Record with exactly the six named fields, in feed order
    pub fn new(
        id: &str,
        symbol: &str,
        name: &str,
        price_usd: &str,
        market_cap_usd: &str,
        change_percent_24hr: &str,
    ) -> Self {
        let mut raw = Map::new();
        raw.insert("id".to_string(), Value::from(id));
        raw.insert("symbol".to_string(), Value::from(symbol));
        raw.insert("name".to_string(), Value::from(name));
        raw.insert("priceUsd".to_string(), Value::from(price_usd));
        raw.insert("marketCapUsd".to_string(), Value::from(market_cap_usd));
        raw.insert("changePercent24Hr".to_string(), Value::from(change_percent_24hr));

        Self {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            price_usd: price_usd.to_string(),
            market_cap_usd: Some(market_cap_usd.to_string()),
            change_percent_24hr: Some(change_percent_24hr.to_string()),
            raw,
        }
    }

    /// Append a field the feed sent beyond the named ones
    ///
    /// Named fields cannot be overridden this way; their view would go stale.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        if !matches!(
            key,
            "id" | "symbol" | "name" | "priceUsd" | "marketCapUsd" | "changePercent24Hr"
        ) {
            self.raw.insert(key.to_string(), value);
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price_usd(&self) -> &str {
        &self.price_usd
    }

    pub fn market_cap_usd(&self) -> Option<&str> {
        self.market_cap_usd.as_deref()
    }

    pub fn change_percent_24hr(&self) -> Option<&str> {
        self.change_percent_24hr.as_deref()
    }

    /// Any field of the record as received
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// The record as received, in feed key order
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

/// Where a snapshot's records came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Live,
    Fallback,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::Fallback => "fallback",
        }
    }
}

/// Records captured at one instant
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub records: Vec<AssetSnapshotRecord>,
    pub source: DataSource,
}

/// One asset in `SLV_assets`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedRow {
    pub asset_id: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub price_usd: Option<f64>,
    pub market_cap: Option<f64>,
    pub change_24h: Option<f64>,
    pub loaded_at: DateTime<Utc>,
}

/// Price bucket used by the summary layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceCategory {
    HighValue,
    LowValue,
}

impl PriceCategory {
    /// Exclusive on the high side: exactly 1000 is low value.
    /// A missing price is low value, like the SQL CASE's ELSE branch.
    pub fn classify(price_usd: Option<f64>) -> Self {
        match price_usd {
            Some(p) if p > HIGH_VALUE_THRESHOLD_USD => PriceCategory::HighValue,
            _ => PriceCategory::LowValue,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PriceCategory::HighValue => "Alto Valor",
            PriceCategory::LowValue => "Baixo Valor",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Alto Valor" => Some(PriceCategory::HighValue),
            "Baixo Valor" => Some(PriceCategory::LowValue),
            _ => None,
        }
    }
}

impl fmt::Display for PriceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One category in `GLD_market_summary`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub category: String,
    pub asset_count: i64,
    pub avg_price_usd: Option<f64>,
}
