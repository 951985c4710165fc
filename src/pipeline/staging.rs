//! Bronze layer: append a raw batch into `BRZ_assets`
//!
//! Load options are fixed: NDJSON, schema autodetection, unknown fields
//! ignored (or added as columns when `allow_field_addition` is set).
//! The staging table is never deduplicated or rewritten.

use super::object_store::ObjectLocation;
use super::warehouse::{
    LoadOptions, LoadStats, SourceFormat, TableRef, Warehouse, WarehouseError, STAGING_TABLE,
};

pub fn staging_table(dataset: &str) -> TableRef {
    TableRef::new(dataset, STAGING_TABLE)
}

pub fn staging_load_options(allow_field_addition: bool) -> LoadOptions {
    LoadOptions {
        format: SourceFormat::NewlineDelimitedJson,
        autodetect: true,
        ignore_unknown_fields: true,
        allow_field_addition,
    }
}

/// Append the batch at `source` to the staging table, waiting for the job
pub async fn load_staging(
    warehouse: &dyn Warehouse,
    source: &ObjectLocation,
    dataset: &str,
    allow_field_addition: bool,
) -> Result<LoadStats, WarehouseError> {
    let target = staging_table(dataset);
    log::info!("🥉 Loading {} into {}", source, target);

    let stats = warehouse
        .load_append(source, &target, &staging_load_options(allow_field_addition))
        .await?;

    log::info!("✅ Staging loaded: {} rows appended to {}", stats.rows_loaded, target);
    if !stats.ignored_fields.is_empty() {
        log::info!("   └─ Ignored unknown fields: {:?}", stats.ignored_fields);
    }
    if !stats.added_columns.is_empty() {
        log::info!("   └─ Added columns: {:?}", stats.added_columns);
    }

    Ok(stats)
}
