//! Integration tests for full pipeline runs
//!
//! Runs `PipelineRunner` against a local object store and an in-memory
//! SQLite warehouse, with fakes wrapped around them to inject failures and
//! count calls.
//!
//! Key behaviors tested:
//! - Fallback data flows end to end into the summary
//! - Persist failure short-circuits every warehouse stage
//! - Lenient vs strict handling of load/refine failures
//! - Staging grows across runs while refined/summary are replaced
//! - Refined rows are stamped when refine begins, not when the run starts

#[cfg(test)]
mod pipeline_integration_tests {
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use coinlake::pipeline::{
        coincap::{fallback_assets, AssetFeed, FeedError},
        config::PipelineConfig,
        engine::{FailureMode, PipelineRunner, Stage},
        object_store::{LocalObjectStore, ObjectLocation, ObjectStore, StoreError},
        refine::{read_refined, CastPolicy},
        sqlite_warehouse::SqliteWarehouse,
        types::{AssetSnapshotRecord, DataSource},
        warehouse::{LoadOptions, LoadStats, QueryStats, Row, TableRef, Warehouse, WarehouseError},
    };
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    // ------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------

    /// Feed that is always down
    struct OfflineFeed;

    #[async_trait]
    impl AssetFeed for OfflineFeed {
        async fn fetch_assets(&self) -> Result<Vec<AssetSnapshotRecord>, FeedError> {
            Err(FeedError::Status(503))
        }

        fn endpoint(&self) -> &str {
            "offline://assets"
        }
    }

    /// Feed returning a fixed list
    struct FixedFeed(Vec<AssetSnapshotRecord>);

    #[async_trait]
    impl AssetFeed for FixedFeed {
        async fn fetch_assets(&self) -> Result<Vec<AssetSnapshotRecord>, FeedError> {
            Ok(self.0.clone())
        }

        fn endpoint(&self) -> &str {
            "fixed://assets"
        }
    }

    /// Object store whose writes always fail
    struct FailingStore;

    #[async_trait]
    impl ObjectStore for FailingStore {
        async fn put(
            &self,
            _key: &str,
            _content: &[u8],
            _content_type: &str,
        ) -> Result<ObjectLocation, StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "bucket is read-only",
            )))
        }

        async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::NotFound(location.uri.clone()))
        }
    }

    /// Real warehouse with call counters and a switchable load failure
    struct CountingWarehouse {
        inner: SqliteWarehouse,
        datasets: AtomicUsize,
        loads: AtomicUsize,
        queries: AtomicUsize,
        fail_loads: AtomicBool,
    }

    impl CountingWarehouse {
        fn new(store: Arc<dyn ObjectStore>) -> Self {
            Self {
                inner: SqliteWarehouse::open_in_memory(store).unwrap(),
                datasets: AtomicUsize::new(0),
                loads: AtomicUsize::new(0),
                queries: AtomicUsize::new(0),
                fail_loads: AtomicBool::new(false),
            }
        }

        fn datasets(&self) -> usize {
            self.datasets.load(Ordering::SeqCst)
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }

        fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }

        async fn count(&self, table: &str) -> i64 {
            let sql = format!("SELECT COUNT(*) AS n FROM \"crypto_analytics\".\"{}\"", table);
            let rows = self.inner.query_rows(&sql).await.unwrap();
            rows[0]["n"].as_i64().unwrap()
        }
    }

    #[async_trait]
    impl Warehouse for CountingWarehouse {
        async fn create_dataset_if_absent(&self, dataset: &str) -> Result<(), WarehouseError> {
            self.datasets.fetch_add(1, Ordering::SeqCst);
            self.inner.create_dataset_if_absent(dataset).await
        }

        async fn load_append(
            &self,
            source: &ObjectLocation,
            target: &TableRef,
            options: &LoadOptions,
        ) -> Result<LoadStats, WarehouseError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(WarehouseError::MalformedDocument {
                    line: 1,
                    reason: "injected load failure".to_string(),
                });
            }
            self.inner.load_append(source, target, options).await
        }

        async fn run_query(&self, sql: &str) -> Result<QueryStats, WarehouseError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.run_query(sql).await
        }

        async fn query_rows(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
            self.inner.query_rows(sql).await
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    struct Harness {
        _dir: TempDir,
        store: Arc<LocalObjectStore>,
        warehouse: Arc<CountingWarehouse>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path(), "lab-dados-gcp-raw").unwrap());
        let warehouse = Arc::new(CountingWarehouse::new(store.clone()));
        Harness {
            _dir: dir,
            store,
            warehouse,
        }
    }

    /// Runner whose clock is frozen at `now`
    fn runner(
        h: &Harness,
        feed: Arc<dyn AssetFeed>,
        config: PipelineConfig,
        now: DateTime<Utc>,
    ) -> PipelineRunner {
        PipelineRunner::new_with_clock(
            feed,
            h.store.clone(),
            h.warehouse.clone(),
            config,
            Box::new(move || now),
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn strict() -> PipelineConfig {
        PipelineConfig {
            failure_mode: FailureMode::Strict,
            ..PipelineConfig::default()
        }
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("mean price present");
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_fallback_run_end_to_end() {
        // Test: Feed down → fallback batch flows through all three layers
        let h = harness();
        let report = runner(&h, Arc::new(OfflineFeed), PipelineConfig::default(), at(1700000000))
            .run()
            .await;

        assert_eq!(report.source, Some(DataSource::Fallback));
        assert!(report.failures.is_empty(), "failures: {:?}", report.failures);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.batch.as_ref().unwrap().key, "raw/coins_1700000000.json");
        assert_eq!(report.rows_staged, Some(3));
        assert_eq!(report.rows_refined, Some(3));

        assert_eq!(report.summary.len(), 2);
        assert_eq!(report.summary[0].category, "Alto Valor");
        assert_eq!(report.summary[0].asset_count, 2);
        assert_close(report.summary[0].avg_price_usd, 34250.35);
        assert_eq!(report.summary[1].category, "Baixo Valor");
        assert_eq!(report.summary[1].asset_count, 1);
        assert_close(report.summary[1].avg_price_usd, 140.0);

        // One setup, one load, one refine, one aggregate
        assert_eq!(h.warehouse.datasets(), 1);
        assert_eq!(h.warehouse.loads(), 1);
        assert_eq!(h.warehouse.queries(), 2);
    }

    #[tokio::test]
    async fn test_persist_failure_short_circuits() {
        // Test: No batch location → no load, refine or aggregate call
        let dir = TempDir::new().unwrap();
        let readable = Arc::new(LocalObjectStore::new(dir.path(), "bucket").unwrap());
        let warehouse = Arc::new(CountingWarehouse::new(readable));

        let report = PipelineRunner::new_with_clock(
            Arc::new(OfflineFeed),
            Arc::new(FailingStore),
            warehouse.clone(),
            PipelineConfig::default(),
            Box::new(|| at(1700000000)),
        )
        .run()
        .await;

        assert_eq!(report.halted_at, Some(Stage::Persist));
        assert_eq!(report.exit_code(), 1);
        assert!(report.batch.is_none());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(warehouse.datasets(), 1);
        assert_eq!(warehouse.loads(), 0);
        assert_eq!(warehouse.queries(), 0);
    }

    #[tokio::test]
    async fn test_lenient_load_failure_continues() {
        let h = harness();
        let feed: Arc<dyn AssetFeed> = Arc::new(OfflineFeed);

        runner(&h, feed.clone(), PipelineConfig::default(), at(1700000000)).run().await;

        // Second run cannot load, but refine/aggregate still run over existing staging
        h.warehouse.fail_loads.store(true, Ordering::SeqCst);
        let report = runner(&h, feed, PipelineConfig::default(), at(1700000060)).run().await;

        assert_eq!(report.exit_code(), 0);
        assert!(!report.halted());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage(), Stage::Load);
        assert_eq!(report.rows_staged, None);
        assert_eq!(report.rows_refined, Some(3));
        assert_eq!(report.summary.len(), 2);
        assert_eq!(h.warehouse.queries(), 4);

        // The batch itself was still persisted
        let batch = report.batch.unwrap();
        assert_eq!(batch.key, "raw/coins_1700000060.json");
        assert!(h.store.get(&batch).await.is_ok());
    }

    #[tokio::test]
    async fn test_lenient_first_run_without_staging() {
        // Load fails on an empty warehouse: refine and aggregate fail too, run still completes
        let h = harness();
        h.warehouse.fail_loads.store(true, Ordering::SeqCst);

        let report = runner(&h, Arc::new(OfflineFeed), PipelineConfig::default(), at(1700000000))
            .run()
            .await;

        let stages: Vec<Stage> = report.failures.iter().map(|f| f.stage()).collect();
        assert_eq!(stages, vec![Stage::Load, Stage::Refine, Stage::Aggregate]);
        assert_eq!(report.exit_code(), 0);
        assert!(report.summary.is_empty());
    }

    #[tokio::test]
    async fn test_strict_halts_on_load_failure() {
        let h = harness();
        h.warehouse.fail_loads.store(true, Ordering::SeqCst);

        let report = runner(&h, Arc::new(OfflineFeed), strict(), at(1700000000)).run().await;

        assert_eq!(report.halted_at, Some(Stage::Load));
        assert_eq!(report.exit_code(), 1);
        assert_eq!(h.warehouse.loads(), 1);
        assert_eq!(h.warehouse.queries(), 0);
    }

    #[tokio::test]
    async fn test_strict_halts_on_bad_price() {
        // Test: Cast failure under fail policy stops before aggregate
        let h = harness();
        let feed = Arc::new(FixedFeed(vec![
            fallback_assets()[0].clone(),
            AssetSnapshotRecord::new("mystery", "???", "Mystery", "n/a", "0", "0"),
        ]));

        let report = runner(&h, feed, strict(), at(1700000000)).run().await;

        assert_eq!(report.halted_at, Some(Stage::Refine));
        assert_eq!(report.rows_staged, Some(2));
        assert_eq!(h.warehouse.queries(), 1);
        assert!(report.failures[0].to_string().contains("n/a"));
    }

    #[tokio::test]
    async fn test_skip_policy_excludes_bad_price() {
        let h = harness();
        let feed = Arc::new(FixedFeed(vec![
            fallback_assets()[0].clone(),
            AssetSnapshotRecord::new("mystery", "???", "Mystery", "n/a", "0", "0"),
        ]));
        let config = PipelineConfig {
            cast_policy: CastPolicy::SkipRow,
            ..PipelineConfig::default()
        };

        let report = runner(&h, feed, config, at(1700000000)).run().await;

        assert_eq!(report.source, Some(DataSource::Live));
        assert!(report.failures.is_empty());
        assert_eq!(report.rows_refined, Some(1));
        assert_eq!(report.summary.len(), 1);
        assert_eq!(report.summary[0].category, "Alto Valor");
        assert_eq!(h.warehouse.count("BRZ_assets").await, 2);
    }

    #[tokio::test]
    async fn test_runs_append_staging_and_replace_refined() {
        let h = harness();
        let feed: Arc<dyn AssetFeed> = Arc::new(OfflineFeed);

        let first = runner(&h, feed.clone(), PipelineConfig::default(), at(1700000000)).run().await;
        let second = runner(&h, feed, PipelineConfig::default(), at(1700000300)).run().await;

        assert_ne!(first.batch, second.batch);
        assert_eq!(h.warehouse.datasets(), 2);
        assert_eq!(h.warehouse.count("BRZ_assets").await, 6);
        // Refined is rebuilt from all of staging, so duplicates show up there
        assert_eq!(h.warehouse.count("SLV_assets").await, 6);
        assert_eq!(h.warehouse.count("GLD_market_summary").await, 2);
        assert_eq!(second.summary[0].asset_count, 4);
        assert_close(second.summary[0].avg_price_usd, 34250.35);
    }

    #[tokio::test]
    async fn test_refine_stamp_read_when_refine_starts() {
        // Test: Clock advances between ingest and refine → loaded_at is the later reading
        let h = harness();
        let tick = Arc::new(AtomicI64::new(1700000000));
        let clock = {
            let tick = tick.clone();
            move || at(tick.fetch_add(7, Ordering::SeqCst))
        };

        let report = PipelineRunner::new_with_clock(
            Arc::new(OfflineFeed),
            h.store.clone(),
            h.warehouse.clone(),
            PipelineConfig::default(),
            Box::new(clock),
        )
        .run()
        .await;

        assert!(report.failures.is_empty(), "failures: {:?}", report.failures);
        assert_eq!(report.batch.unwrap().key, "raw/coins_1700000000.json");
        assert_eq!(tick.load(Ordering::SeqCst), 1700000014, "clock read twice");

        let refined = read_refined(h.warehouse.as_ref(), "crypto_analytics").await.unwrap();
        assert_eq!(refined.len(), 3);
        assert!(refined.iter().all(|r| r.loaded_at == at(1700000007)));
    }

    #[tokio::test]
    async fn test_same_second_runs_get_distinct_batches() {
        let h = harness();
        let feed: Arc<dyn AssetFeed> = Arc::new(OfflineFeed);

        let first = runner(&h, feed.clone(), PipelineConfig::default(), at(1700000000)).run().await;
        let second = runner(&h, feed, PipelineConfig::default(), at(1700000000)).run().await;

        assert_eq!(first.batch.unwrap().key, "raw/coins_1700000000.json");
        assert_eq!(second.batch.unwrap().key, "raw/coins_1700000000_1.json");
        assert_eq!(h.warehouse.count("BRZ_assets").await, 6);
    }

    #[tokio::test]
    async fn test_new_feed_fields_added_when_allowed() {
        let h = harness();
        let config = PipelineConfig {
            allow_field_addition: true,
            ..PipelineConfig::default()
        };

        runner(&h, Arc::new(OfflineFeed), config.clone(), at(1700000000)).run().await;

        let record = AssetSnapshotRecord::new("tron", "TRX", "TRON", "0.10", "9000000000", "1.0")
            .with_field("supply", serde_json::json!("87000000000"));
        let report = runner(&h, Arc::new(FixedFeed(vec![record])), config, at(1700000060))
            .run()
            .await;

        assert!(report.failures.is_empty());
        let rows = h
            .warehouse
            .query_rows("SELECT supply FROM \"crypto_analytics\".\"BRZ_assets\" ORDER BY rowid")
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows[0]["supply"].is_null());
        assert_eq!(rows[3]["supply"], "87000000000");
    }
}
