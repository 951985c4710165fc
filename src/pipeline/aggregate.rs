//! Gold layer: rebuild `GLD_market_summary` from `SLV_assets`

use super::refine::refined_table;
use super::types::{PriceCategory, SummaryRow, HIGH_VALUE_THRESHOLD_USD};
use super::warehouse::{QueryStats, TableRef, Warehouse, WarehouseError, SUMMARY_TABLE};

pub fn summary_table(dataset: &str) -> TableRef {
    TableRef::new(dataset, SUMMARY_TABLE)
}

/// Build the replace script for `GLD_market_summary`
///
/// Rows are inserted in output order (mean price descending, category name
/// breaking ties), so reading back by rowid preserves it.
pub fn aggregate_sql(dataset: &str) -> String {
    let source = refined_table(dataset).sql_name();
    let target = summary_table(dataset).sql_name();

    format!(
        r#"
    DROP TABLE IF EXISTS {target};
    CREATE TABLE {target} (
        category       TEXT NOT NULL,
        asset_count    INTEGER NOT NULL,
        avg_price_usd  REAL
    );
    INSERT INTO {target} (category, asset_count, avg_price_usd)
    SELECT
        CASE WHEN price_usd > {threshold:.1} THEN '{high}' ELSE '{low}' END AS category,
        COUNT(asset_id) AS asset_count,
        ROUND(AVG(price_usd), 2) AS avg_price_usd
    FROM {source}
    GROUP BY 1
    ORDER BY avg_price_usd DESC, category ASC;
    "#,
        target = target,
        source = source,
        threshold = HIGH_VALUE_THRESHOLD_USD,
        high = PriceCategory::HighValue.label(),
        low = PriceCategory::LowValue.label(),
    )
}

/// Recompute the market summary from the current refined table
pub async fn aggregate_summary(
    warehouse: &dyn Warehouse,
    dataset: &str,
) -> Result<QueryStats, WarehouseError> {
    log::info!("🥇 Rebuilding {}", summary_table(dataset));

    let stats = warehouse.run_query(&aggregate_sql(dataset)).await?;

    log::info!("✅ Summary table replaced: {} categories", stats.rows_changed);
    Ok(stats)
}

/// Read `GLD_market_summary` back in its stored order
pub async fn read_summary(
    warehouse: &dyn Warehouse,
    dataset: &str,
) -> Result<Vec<SummaryRow>, WarehouseError> {
    let rows = warehouse
        .query_rows(&format!(
            "SELECT category, asset_count, avg_price_usd FROM {} ORDER BY rowid",
            summary_table(dataset).sql_name()
        ))
        .await?;

    rows.into_iter()
        .map(|row| {
            serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| {
                WarehouseError::MalformedDocument {
                    line: 0,
                    reason: format!("unexpected summary row: {}", e),
                }
            })
        })
        .collect()
}
