//! Pipeline Engine - single-run orchestration of the medallion layers
//!
//! ## Flow
//!
//! ```text
//! SETUP           create dataset if absent
//!   ↓
//! INGEST          fetch snapshot (live or fallback) → persist raw batch
//!   ↓             (no batch location: stop)
//! BRONZE_LOAD     append batch into BRZ_assets
//!   ↓
//! SILVER_REFINE   replace SLV_assets
//!   ↓
//! GOLD_AGGREGATE  replace GLD_market_summary
//!   ↓
//! DONE
//! ```
//!
//! Each stage is attempted at most once. What a stage failure does to the
//! run is decided by `FailureMode::halts_on`:
//!
//! | Failure   | lenient  | strict |
//! |-----------|----------|--------|
//! | Setup     | continue | halt   |
//! | Persist   | halt     | halt   |
//! | Load      | continue | halt   |
//! | Refine    | continue | halt   |
//! | Aggregate | continue | halt   |
//!
//! An unreachable feed is not a failure: the fetcher recovers with fallback
//! data and the report records `DataSource::Fallback`.

use super::aggregate::{aggregate_summary, read_summary};
use super::coincap::{fetch_snapshot, AssetFeed};
use super::config::PipelineConfig;
use super::ndjson::{persist_batch, PersistError};
use super::object_store::{ObjectLocation, ObjectStore};
use super::refine::refine_assets;
use super::staging::load_staging;
use super::types::{DataSource, SummaryRow};
use super::warehouse::{Warehouse, WarehouseError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// How non-persist stage failures affect the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Log, record and keep going
    Lenient,
    /// Halt at the first failing stage
    Strict,
}

impl FailureMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "lenient" => Some(FailureMode::Lenient),
            "strict" => Some(FailureMode::Strict),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::Lenient => "lenient",
            FailureMode::Strict => "strict",
        }
    }

    /// Decision table: does a failure in `stage` end the run?
    pub fn halts_on(&self, stage: Stage) -> bool {
        match (self, stage) {
            (_, Stage::Persist) => true,
            (FailureMode::Strict, _) => true,
            (FailureMode::Lenient, _) => false,
        }
    }
}

/// Stages that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Persist,
    Load,
    Refine,
    Aggregate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Persist => "persist",
            Stage::Load => "staging load",
            Stage::Refine => "refine",
            Stage::Aggregate => "aggregate",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum PipelineError {
    Setup(WarehouseError),
    Persist(PersistError),
    Load(WarehouseError),
    Refine(WarehouseError),
    Aggregate(WarehouseError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Setup(_) => Stage::Setup,
            PipelineError::Persist(_) => Stage::Persist,
            PipelineError::Load(_) => Stage::Load,
            PipelineError::Refine(_) => Stage::Refine,
            PipelineError::Aggregate(_) => Stage::Aggregate,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Setup(e) => write!(f, "Setup failed: {}", e),
            PipelineError::Persist(e) => write!(f, "Persist failed: {}", e),
            PipelineError::Load(e) => write!(f, "Staging load failed: {}", e),
            PipelineError::Refine(e) => write!(f, "Refine failed: {}", e),
            PipelineError::Aggregate(e) => write!(f, "Aggregate failed: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Outcome of one pipeline run
#[derive(Debug, Default)]
pub struct RunReport {
    /// None only when the run halted before fetching
    pub source: Option<DataSource>,
    pub batch: Option<ObjectLocation>,
    pub rows_staged: Option<usize>,
    pub rows_refined: Option<usize>,
    pub summary: Vec<SummaryRow>,
    /// Every failure, fatal or not, in the order it happened
    pub failures: Vec<PipelineError>,
    pub halted_at: Option<Stage>,
}

impl RunReport {
    pub fn halted(&self) -> bool {
        self.halted_at.is_some()
    }

    /// 0 when the run reached DONE, 1 when it halted
    pub fn exit_code(&self) -> i32 {
        if self.halted() {
            1
        } else {
            0
        }
    }
}

/// Runs the pipeline once against injected collaborators
pub struct PipelineRunner {
    feed: Arc<dyn AssetFeed>,
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    config: PipelineConfig,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl PipelineRunner {
    pub fn new(
        feed: Arc<dyn AssetFeed>,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        config: PipelineConfig,
    ) -> Self {
        Self::new_with_clock(feed, store, warehouse, config, Box::new(Utc::now))
    }

    /// Create with a custom clock (useful for testing)
    pub fn new_with_clock(
        feed: Arc<dyn AssetFeed>,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        config: PipelineConfig,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            feed,
            store,
            warehouse,
            config,
            now_fn,
        }
    }

    /// Run once. The clock is read when INGEST captures the batch and again
    /// when SILVER_REFINE stamps `loaded_at`.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let dataset = self.config.dataset.as_str();
        let mut report = RunReport::default();

        log::info!(
            "🚀 Pipeline run started (dataset: {}, failure mode: {})",
            dataset,
            self.config.failure_mode.as_str()
        );

        // SETUP
        if let Err(e) = self.warehouse.create_dataset_if_absent(dataset).await {
            if self.record_failure(&mut report, PipelineError::Setup(e)) {
                return report;
            }
        }

        // INGEST
        let snapshot = fetch_snapshot(self.feed.as_ref()).await;
        report.source = Some(snapshot.source);

        let captured_at = (self.now_fn)();
        let persisted = persist_batch(self.store.as_ref(), &snapshot.records, captured_at).await;
        let location = match persisted {
            Ok(location) => location,
            Err(e) => {
                self.record_failure(&mut report, PipelineError::Persist(e));
                return report;
            }
        };
        report.batch = Some(location.clone());

        // BRONZE_LOAD
        match load_staging(
            self.warehouse.as_ref(),
            &location,
            dataset,
            self.config.allow_field_addition,
        )
        .await
        {
            Ok(stats) => report.rows_staged = Some(stats.rows_loaded),
            Err(e) => {
                if self.record_failure(&mut report, PipelineError::Load(e)) {
                    return report;
                }
            }
        }

        // SILVER_REFINE
        let loaded_at = (self.now_fn)();
        let policy = self.config.cast_policy;
        match refine_assets(self.warehouse.as_ref(), dataset, policy, loaded_at).await {
            Ok(stats) => report.rows_refined = Some(stats.rows_changed),
            Err(e) => {
                if self.record_failure(&mut report, PipelineError::Refine(e)) {
                    return report;
                }
            }
        }

        // GOLD_AGGREGATE
        match aggregate_summary(self.warehouse.as_ref(), dataset).await {
            Ok(_) => self.log_summary(&mut report).await,
            Err(e) => {
                if self.record_failure(&mut report, PipelineError::Aggregate(e)) {
                    return report;
                }
            }
        }

        log::info!(
            "🏁 Pipeline run complete in {:?} ({} data, {} non-fatal failures)",
            started.elapsed(),
            report.source.map(|s| s.as_str()).unwrap_or("no"),
            report.failures.len()
        );
        report
    }

    /// Log and record a stage failure; returns true when the run must stop
    fn record_failure(&self, report: &mut RunReport, error: PipelineError) -> bool {
        let stage = error.stage();
        let halt = self.config.failure_mode.halts_on(stage);

        if halt {
            log::error!("❌ {} - halting run", error);
            report.halted_at = Some(stage);
        } else {
            log::error!("❌ {} - continuing", error);
        }

        report.failures.push(error);
        halt
    }

    async fn log_summary(&self, report: &mut RunReport) {
        match read_summary(self.warehouse.as_ref(), &self.config.dataset).await {
            Ok(rows) => {
                log::info!("📊 Market summary:");
                for row in &rows {
                    let avg = row
                        .avg_price_usd
                        .map(|p| format!("${:.2}", p))
                        .unwrap_or_else(|| "n/a".to_string());
                    log::info!(
                        "   ├─ {}: {} assets, avg price {}",
                        row.category,
                        row.asset_count,
                        avg
                    );
                }
                report.summary = rows;
            }
            Err(e) => log::warn!("⚠️  Could not read back market summary: {}", e),
        }
    }
}
