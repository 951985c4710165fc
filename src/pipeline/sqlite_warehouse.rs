//! SQLite implementation of the `Warehouse` contract
//!
//! Each dataset is a separate SQLite file (`<data_dir>/<dataset>.db`) attached
//! to one connection under the dataset's name, so tables are addressed as
//! `"dataset"."table"` exactly like a warehouse would.
//!
//! Load jobs and query jobs each run in their own transaction: a failed job
//! leaves every table as it was.

use super::numeric::register_numeric_functions;
use super::object_store::{ObjectLocation, ObjectStore};
use super::warehouse::{
    is_plain_identifier, quote_ident, LoadOptions, LoadStats, QueryStats, Row, SourceFormat,
    TableRef, Warehouse, WarehouseError,
};
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, DatabaseName};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Column type inferred from NDJSON values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
}

impl ColumnType {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Number(n) if n.is_i64() => Some(ColumnType::Integer),
            Value::Number(_) => Some(ColumnType::Real),
            // Strings, nested objects and arrays all land as text
            _ => Some(ColumnType::Text),
        }
    }

    /// Widen when the same field carries different types across rows
    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnType::Integer, ColumnType::Real) | (ColumnType::Real, ColumnType::Integer) => {
                ColumnType::Real
            }
            _ => ColumnType::Text,
        }
    }

    fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Boolean => "BOOLEAN",
        }
    }
}

struct WarehouseState {
    conn: Connection,
    datasets: HashSet<String>,
}

pub struct SqliteWarehouse {
    state: Mutex<WarehouseState>,
    store: Arc<dyn ObjectStore>,
    /// None keeps every dataset in memory
    data_dir: Option<PathBuf>,
}

impl SqliteWarehouse {
    /// Open a file-backed warehouse rooted at `data_dir`
    ///
    /// `store` is where load jobs read their source documents from.
    pub fn open(
        data_dir: impl AsRef<Path>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, WarehouseError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        log::info!("🏛️  Warehouse directory: {}", data_dir.display());
        Self::with_connection(Connection::open_in_memory()?, store, Some(data_dir))
    }

    /// Fully in-memory warehouse (datasets vanish with the process)
    pub fn open_in_memory(store: Arc<dyn ObjectStore>) -> Result<Self, WarehouseError> {
        Self::with_connection(Connection::open_in_memory()?, store, None)
    }

    fn with_connection(
        conn: Connection,
        store: Arc<dyn ObjectStore>,
        data_dir: Option<PathBuf>,
    ) -> Result<Self, WarehouseError> {
        register_numeric_functions(&conn)?;

        Ok(Self {
            state: Mutex::new(WarehouseState {
                conn,
                datasets: HashSet::new(),
            }),
            store,
            data_dir,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, WarehouseState>, WarehouseError> {
        self.state.lock().map_err(|_| WarehouseError::LockPoisoned)
    }

    fn attach_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        if !is_plain_identifier(dataset) {
            return Err(WarehouseError::InvalidIdentifier(dataset.to_string()));
        }

        let mut state = self.lock()?;
        if state.datasets.contains(dataset) {
            return Ok(());
        }

        let target = match &self.data_dir {
            Some(dir) => dir.join(format!("{}.db", dataset)).to_string_lossy().into_owned(),
            None => ":memory:".to_string(),
        };

        state.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", quote_ident(dataset)),
            [&target],
        )?;

        if self.data_dir.is_some() {
            let mode: String = state.conn.pragma_update_and_check(
                Some(DatabaseName::Attached(dataset)),
                "journal_mode",
                "WAL",
                |row| row.get(0),
            )?;
            log::debug!("Dataset {} journal_mode={}", dataset, mode);
        }

        state.datasets.insert(dataset.to_string());
        log::info!("📊 Dataset '{}' ready ({})", dataset, target);
        Ok(())
    }

    fn ensure_table_ref(
        &self,
        state: &WarehouseState,
        table: &TableRef,
    ) -> Result<(), WarehouseError> {
        if !is_plain_identifier(&table.table) {
            return Err(WarehouseError::InvalidIdentifier(table.table.clone()));
        }
        if !state.datasets.contains(&table.dataset) {
            return Err(WarehouseError::DatasetNotFound(table.dataset.clone()));
        }
        Ok(())
    }

    /// Synchronous half of a load job, run once the document is in memory
    fn append_rows(
        &self,
        rows: Vec<Row>,
        target: &TableRef,
        options: &LoadOptions,
    ) -> Result<LoadStats, WarehouseError> {
        let mut state = self.lock()?;
        self.ensure_table_ref(&state, target)?;

        let tx = state.conn.transaction()?;
        let mut stats = LoadStats::default();
        let mut columns = table_columns(&tx, target)?;

        if columns.is_empty() {
            if !options.autodetect {
                return Err(WarehouseError::SchemaRequired(target.to_string()));
            }

            let schema = infer_schema(&rows);
            if schema.is_empty() {
                log::warn!("⚠️  Empty document, nothing to infer for {}", target);
                return Ok(stats);
            }

            let column_defs: Vec<String> = schema
                .iter()
                .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql_type()))
                .collect();
            tx.execute_batch(&format!(
                "CREATE TABLE {} ({})",
                target.sql_name(),
                column_defs.join(", ")
            ))?;

            log::info!("🆕 Created {} with {} inferred columns", target, schema.len());
            stats.created_table = true;
            columns = schema.into_iter().map(|(name, _)| name).collect();
        } else {
            let known: HashSet<&str> = columns.iter().map(String::as_str).collect();
            let unknown: Vec<(String, ColumnType)> = infer_schema(&rows)
                .into_iter()
                .filter(|(name, _)| !known.contains(name.as_str()))
                .collect();

            if !unknown.is_empty() {
                if options.allow_field_addition {
                    for (name, ty) in unknown {
                        tx.execute_batch(&format!(
                            "ALTER TABLE {} ADD COLUMN {} {}",
                            target.sql_name(),
                            quote_ident(&name),
                            ty.sql_type()
                        ))?;
                        log::info!("➕ Added column {} ({}) to {}", name, ty.sql_type(), target);
                        stats.added_columns.push(name.clone());
                        columns.push(name);
                    }
                } else if options.ignore_unknown_fields {
                    stats.ignored_fields = unknown
                        .into_iter()
                        .map(|(name, _)| name)
                        .collect::<BTreeSet<_>>();
                    log::debug!("Ignoring fields not in {}: {:?}", target, stats.ignored_fields);
                } else {
                    return Err(WarehouseError::UnknownField {
                        table: target.to_string(),
                        field: unknown[0].0.clone(),
                    });
                }
            }
        }

        {
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                target.sql_name(),
                quoted.join(", "),
                placeholders.join(", ")
            ))?;

            for row in &rows {
                let values = columns
                    .iter()
                    .map(|c| row.get(c).map(to_sql_value).unwrap_or(SqlValue::Null));
                stmt.execute(rusqlite::params_from_iter(values))?;
            }
        }

        tx.commit()?;
        stats.rows_loaded = rows.len();
        Ok(stats)
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn create_dataset_if_absent(&self, dataset: &str) -> Result<(), WarehouseError> {
        self.attach_dataset(dataset)
    }

    async fn load_append(
        &self,
        source: &ObjectLocation,
        target: &TableRef,
        options: &LoadOptions,
    ) -> Result<LoadStats, WarehouseError> {
        let bytes = self.store.get(source).await?;

        let rows = match options.format {
            SourceFormat::NewlineDelimitedJson => parse_ndjson(&bytes)?,
        };

        self.append_rows(rows, target, options)
    }

    async fn run_query(&self, sql: &str) -> Result<QueryStats, WarehouseError> {
        let mut state = self.lock()?;
        let tx = state.conn.transaction()?;
        tx.execute_batch(sql)?;
        let rows_changed = tx.changes() as usize;
        tx.commit()?;
        Ok(QueryStats { rows_changed })
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        let state = self.lock()?;
        let mut stmt = state.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut decoded = Row::new();
            for (idx, name) in names.iter().enumerate() {
                decoded.insert(name.clone(), from_sql_value(row.get_ref(idx)?));
            }
            out.push(decoded);
        }
        Ok(out)
    }
}

/// Split a newline-delimited document into JSON objects.
/// Blank lines are skipped; any other non-object line fails the whole document.
fn parse_ndjson(bytes: &[u8]) -> Result<Vec<Row>, WarehouseError> {
    let text = std::str::from_utf8(bytes).map_err(|e| WarehouseError::MalformedDocument {
        line: 0,
        reason: format!("not UTF-8: {}", e),
    })?;

    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => rows.push(map),
            Ok(_) => {
                return Err(WarehouseError::MalformedDocument {
                    line: idx + 1,
                    reason: "expected a JSON object".to_string(),
                })
            }
            Err(e) => {
                return Err(WarehouseError::MalformedDocument {
                    line: idx + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(rows)
}

/// Columns in first-seen order; type from the non-null values seen
fn infer_schema(rows: &[Row]) -> Vec<(String, ColumnType)> {
    let mut schema: Vec<(String, Option<ColumnType>)> = Vec::new();

    for row in rows {
        for (key, value) in row {
            let seen = ColumnType::of(value);
            match schema.iter_mut().find(|(name, _)| name == key) {
                Some((_, ty)) => {
                    *ty = match (*ty, seen) {
                        (Some(a), Some(b)) => Some(a.merge(b)),
                        (a, b) => a.or(b),
                    };
                }
                None => schema.push((key.clone(), seen)),
            }
        }
    }

    schema
        .into_iter()
        .map(|(name, ty)| (name, ty.unwrap_or(ColumnType::Text)))
        .collect()
}

fn table_columns(conn: &Connection, table: &TableRef) -> Result<Vec<String>, WarehouseError> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA {}.table_info({})",
        quote_ident(&table.dataset),
        quote_ident(&table.table)
    ))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            _ => SqlValue::Text(n.to_string()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        nested => SqlValue::Text(nested.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}
