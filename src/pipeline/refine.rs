//! Silver layer: rebuild `SLV_assets` from the whole of `BRZ_assets`
//!
//! Full replace, never incremental. The drop/create/insert script runs as a
//! single warehouse job, so a failed refine keeps the previous table.

use super::numeric::{CAST_FLOAT64, IS_FLOAT64, TRY_CAST_FLOAT64};
use super::staging::staging_table;
use super::types::RefinedRow;
use super::warehouse::{QueryStats, TableRef, Warehouse, WarehouseError, REFINED_TABLE};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeSet;

/// What to do with numeric text that does not parse as a float
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastPolicy {
    /// Abort the whole refine step
    Fail,
    /// Keep the row, store NULL in the bad field
    NullField,
    /// Drop rows with any bad numeric field
    SkipRow,
}

impl CastPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "fail" => Some(CastPolicy::Fail),
            "null" => Some(CastPolicy::NullField),
            "skip" => Some(CastPolicy::SkipRow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CastPolicy::Fail => "fail",
            CastPolicy::NullField => "null",
            CastPolicy::SkipRow => "skip",
        }
    }
}

/// Staging fields carried as text and cast by the refiner
const NUMERIC_FIELDS: [(&str, &str); 3] = [
    ("priceUsd", "price_usd"),
    ("marketCapUsd", "market_cap"),
    ("changePercent24Hr", "change_24h"),
];

pub fn refined_table(dataset: &str) -> TableRef {
    TableRef::new(dataset, REFINED_TABLE)
}

/// Build the replace script for `SLV_assets`
///
/// `staged_columns` are the columns `BRZ_assets` currently has. A numeric
/// field the feed has never sent has no column and refines to NULL.
pub fn refine_sql(
    dataset: &str,
    policy: CastPolicy,
    loaded_at: DateTime<Utc>,
    staged_columns: &BTreeSet<String>,
) -> String {
    let source = staging_table(dataset).sql_name();
    let target = refined_table(dataset).sql_name();

    let cast_fn = match policy {
        CastPolicy::Fail => CAST_FLOAT64,
        CastPolicy::NullField | CastPolicy::SkipRow => TRY_CAST_FLOAT64,
    };

    let present: Vec<(&str, &str)> = NUMERIC_FIELDS
        .iter()
        .copied()
        .filter(|(raw, _)| staged_columns.contains(*raw))
        .collect();

    let casts: Vec<String> = NUMERIC_FIELDS
        .iter()
        .map(|(raw, typed)| {
            if staged_columns.contains(*raw) {
                format!("        {}(\"{}\") AS {}", cast_fn, raw, typed)
            } else {
                format!("        NULL AS {}", typed)
            }
        })
        .collect();

    let filter = match policy {
        CastPolicy::SkipRow if !present.is_empty() => {
            let checks: Vec<String> = present
                .iter()
                .map(|(raw, _)| format!("{}(\"{}\")", IS_FLOAT64, raw))
                .collect();
            format!("\n    WHERE {}", checks.join(" AND "))
        }
        _ => String::new(),
    };

    format!(
        r#"
    DROP TABLE IF EXISTS {target};
    CREATE TABLE {target} (
        asset_id    TEXT,
        symbol      TEXT,
        name        TEXT,
        price_usd   REAL,
        market_cap  REAL,
        change_24h  REAL,
        loaded_at   TEXT NOT NULL
    );
    INSERT INTO {target} (asset_id, symbol, name, price_usd, market_cap, change_24h, loaded_at)
    SELECT
        "id" AS asset_id,
        "symbol",
        "name",
{casts},
        '{loaded_at}' AS loaded_at
    FROM {source}{filter}
    ORDER BY rowid;
    "#,
        target = target,
        source = source,
        casts = casts.join(",\n"),
        loaded_at = loaded_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        filter = filter,
    )
}

/// Recompute `SLV_assets` from the current staging contents
pub async fn refine_assets(
    warehouse: &dyn Warehouse,
    dataset: &str,
    policy: CastPolicy,
    loaded_at: DateTime<Utc>,
) -> Result<QueryStats, WarehouseError> {
    log::info!(
        "🥈 Rebuilding {} (cast policy: {})",
        refined_table(dataset),
        policy.as_str()
    );

    let staged_columns = staging_columns(warehouse, dataset).await?;
    let stats = warehouse
        .run_query(&refine_sql(dataset, policy, loaded_at, &staged_columns))
        .await?;

    log::info!("✅ Refined table replaced: {} rows", stats.rows_changed);
    Ok(stats)
}

/// Column names of `BRZ_assets`, empty when the table does not exist yet
async fn staging_columns(
    warehouse: &dyn Warehouse,
    dataset: &str,
) -> Result<BTreeSet<String>, WarehouseError> {
    let table = staging_table(dataset);
    let rows = warehouse
        .query_rows(&format!(
            "SELECT name FROM pragma_table_info({}, {})",
            sql_string(&table.table),
            sql_string(&table.dataset)
        ))
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.get("name").and_then(|v| v.as_str()).map(String::from))
        .collect())
}

fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Read `SLV_assets` back in insertion order
pub async fn read_refined(
    warehouse: &dyn Warehouse,
    dataset: &str,
) -> Result<Vec<RefinedRow>, WarehouseError> {
    let rows = warehouse
        .query_rows(&format!(
            "SELECT asset_id, symbol, name, price_usd, market_cap, change_24h, loaded_at FROM {} ORDER BY rowid",
            refined_table(dataset).sql_name()
        ))
        .await?;

    rows.into_iter()
        .map(|row| {
            serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| {
                WarehouseError::MalformedDocument {
                    line: 0,
                    reason: format!("unexpected refined row: {}", e),
                }
            })
        })
        .collect()
}
