//! # Medallion crypto pipeline
//!
//! One run captures a market snapshot and pushes it through three layers:
//!
//! 1. **Raw**: the snapshot is written as an immutable NDJSON batch to the
//!    object store (`raw/coins_<unix-seconds>.json`)
//! 2. **Bronze** (`BRZ_assets`): the batch is appended to the staging table
//! 3. **Silver** (`SLV_assets`): staging is cast to typed columns, full replace
//! 4. **Gold** (`GLD_market_summary`): price categories with counts and mean
//!    price, full replace
//!
//! ## Module Organization
//!
//! - `types` - Record types for each layer
//! - `coincap` - Asset feed client and fallback dataset
//! - `ndjson` - Batch rendering and raw persistence
//! - `staging` / `refine` / `aggregate` - One module per warehouse layer
//! - `object_store` / `warehouse` - Collaborator contracts
//! - `sqlite_warehouse` / `numeric` - SQLite warehouse backend
//! - `engine` - Run state machine and failure policy
//! - `config` - Environment configuration

pub mod types;
pub mod coincap;
pub mod ndjson;
pub mod object_store;
pub mod warehouse;
pub mod numeric;
pub mod sqlite_warehouse;
pub mod staging;
pub mod refine;
pub mod aggregate;
pub mod engine;
pub mod config;

// Re-export commonly used types
pub use types::{AssetSnapshotRecord, DataSource, PriceCategory, RefinedRow, Snapshot, SummaryRow};
pub use coincap::{AssetFeed, CoinCapFeed};
pub use object_store::{LocalObjectStore, ObjectLocation, ObjectStore};
pub use warehouse::{TableRef, Warehouse};
pub use sqlite_warehouse::SqliteWarehouse;
pub use refine::CastPolicy;
pub use engine::{FailureMode, PipelineRunner, RunReport};
pub use config::PipelineConfig;
