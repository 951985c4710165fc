//! Data warehouse contract
//!
//! Tables written by the pipeline:
//! - `BRZ_assets` - append-only staging (load jobs only)
//! - `SLV_assets` - replaced on every run
//! - `GLD_market_summary` - replaced on every run
//!
//! Every call waits for its job to finish before returning.

use super::object_store::{ObjectLocation, StoreError};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;

pub const STAGING_TABLE: &str = "BRZ_assets";
pub const REFINED_TABLE: &str = "SLV_assets";
pub const SUMMARY_TABLE: &str = "GLD_market_summary";

/// A decoded result row, keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug)]
pub enum WarehouseError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    Source(StoreError),
    MalformedDocument { line: usize, reason: String },
    DatasetNotFound(String),
    InvalidIdentifier(String),
    SchemaRequired(String),
    UnknownField { table: String, field: String },
    LockPoisoned,
}

impl From<rusqlite::Error> for WarehouseError {
    fn from(err: rusqlite::Error) -> Self {
        WarehouseError::Database(err)
    }
}

impl From<std::io::Error> for WarehouseError {
    fn from(err: std::io::Error) -> Self {
        WarehouseError::Io(err)
    }
}

impl From<StoreError> for WarehouseError {
    fn from(err: StoreError) -> Self {
        WarehouseError::Source(err)
    }
}

impl fmt::Display for WarehouseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarehouseError::Database(e) => write!(f, "Database error: {}", e),
            WarehouseError::Io(e) => write!(f, "IO error: {}", e),
            WarehouseError::Source(e) => write!(f, "Source object error: {}", e),
            WarehouseError::MalformedDocument { line, reason } => {
                write!(f, "Malformed document at line {}: {}", line, reason)
            }
            WarehouseError::DatasetNotFound(id) => write!(f, "Dataset not found: {}", id),
            WarehouseError::InvalidIdentifier(id) => write!(f, "Invalid identifier: {}", id),
            WarehouseError::SchemaRequired(table) => {
                write!(f, "Table {} does not exist and schema autodetection is off", table)
            }
            WarehouseError::UnknownField { table, field } => {
                write!(f, "Field '{}' is not in the schema of {}", field, table)
            }
            WarehouseError::LockPoisoned => write!(f, "Warehouse connection lock poisoned"),
        }
    }
}

impl std::error::Error for WarehouseError {}

/// `<dataset>.<table>` address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: &str, table: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    /// Quoted name usable in SQL text
    pub fn sql_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.dataset), quote_ident(&self.table))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Double-quote an SQL identifier, escaping embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Dataset ids must be plain identifiers: they name attached databases and files
pub fn is_plain_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    NewlineDelimitedJson,
}

/// Load job configuration
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub format: SourceFormat,
    /// Infer and create the table schema when the table is absent
    pub autodetect: bool,
    /// Drop fields missing from the table schema instead of failing
    pub ignore_unknown_fields: bool,
    /// Add unknown fields as new nullable columns (takes precedence over ignoring)
    pub allow_field_addition: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            format: SourceFormat::NewlineDelimitedJson,
            autodetect: true,
            ignore_unknown_fields: true,
            allow_field_addition: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadStats {
    pub rows_loaded: usize,
    pub created_table: bool,
    pub added_columns: Vec<String>,
    pub ignored_fields: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    pub rows_changed: usize,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the dataset if it does not exist yet (idempotent)
    async fn create_dataset_if_absent(&self, dataset: &str) -> Result<(), WarehouseError>;

    /// Append the document at `source` into `target`
    async fn load_append(
        &self,
        source: &ObjectLocation,
        target: &TableRef,
        options: &LoadOptions,
    ) -> Result<LoadStats, WarehouseError>;

    /// Run a (possibly multi-statement) script as a single job.
    /// Either every statement applies or none does.
    async fn run_query(&self, sql: &str) -> Result<QueryStats, WarehouseError>;

    /// Run a read-only query and decode every row
    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>, WarehouseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ref_quoting() {
        let table = TableRef::new("crypto_analytics", STAGING_TABLE);
        assert_eq!(table.sql_name(), r#""crypto_analytics"."BRZ_assets""#);
        assert_eq!(table.to_string(), "crypto_analytics.BRZ_assets");
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("crypto_analytics"));
        assert!(is_plain_identifier("_x1"));
        assert!(!is_plain_identifier("1abc"));
        assert!(!is_plain_identifier("a-b"));
        assert!(!is_plain_identifier("a.b"));
        assert!(!is_plain_identifier(""));
    }
}
