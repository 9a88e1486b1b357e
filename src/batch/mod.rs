//! Batch orchestrator.
//!
//! Walks the registry in order and each dataset's years in ascending order:
//! 1. Skip years whose artifact already exists
//! 2. Fetch the rest through the page navigator, one at a time
//! 3. Record every outcome; a failed year never stops the batch
//!
//! Failed years are not retried within a run. Running the batch again only
//! fetches what is still missing.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::{DatasetDescriptor, FetchOutcome, FetchTask};
use crate::navigator::PageNavigator;
use crate::storage::{StorageConfig, StorageError};

/// Errors that stop a batch before any task runs.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Target directory unusable: {0}")]
    TargetDir(#[from] StorageError),

    #[error("No datasets to process")]
    EmptyRegistry,
}

/// Outcome of one (dataset, year) task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub dataset_id: String,
    pub year: i32,
    pub filename: String,
    pub outcome: FetchOutcome,
    pub elapsed_ms: u64,
}

/// Outcome counts for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub dataset_id: String,
    pub skipped: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub planned: u32,
}

impl DatasetSummary {
    fn count(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Skipped { .. } => self.skipped += 1,
            FetchOutcome::Succeeded => self.succeeded += 1,
            FetchOutcome::Failed { .. } => self.failed += 1,
            FetchOutcome::Planned => self.planned += 1,
        }
    }
}

/// Everything a batch run did, in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub records: Vec<TaskRecord>,
}

impl BatchReport {
    /// Per-dataset counts, in the order datasets were processed.
    pub fn summaries(&self) -> Vec<DatasetSummary> {
        let mut summaries: Vec<DatasetSummary> = Vec::new();
        for record in &self.records {
            let index = match summaries
                .iter()
                .position(|s| s.dataset_id == record.dataset_id)
            {
                Some(i) => i,
                None => {
                    summaries.push(DatasetSummary {
                        dataset_id: record.dataset_id.clone(),
                        ..Default::default()
                    });
                    summaries.len() - 1
                }
            };
            summaries[index].count(&record.outcome);
        }
        summaries
    }

    pub fn totals(&self) -> DatasetSummary {
        let mut totals = DatasetSummary {
            dataset_id: "total".to_string(),
            ..Default::default()
        };
        for record in &self.records {
            totals.count(&record.outcome);
        }
        totals
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter().filter(|r| r.outcome.is_failure())
    }

    pub fn outcome_for(&self, dataset_id: &str, year: i32) -> Option<&FetchOutcome> {
        self.records
            .iter()
            .find(|r| r.dataset_id == dataset_id && r.year == year)
            .map(|r| &r.outcome)
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Sequential batch runner over a page navigator.
pub struct BatchOrchestrator<N> {
    navigator: N,
    storage: StorageConfig,
    dry_run: bool,
}

impl<N: PageNavigator> BatchOrchestrator<N> {
    pub fn new(navigator: N, storage: StorageConfig) -> Self {
        Self {
            navigator,
            storage,
            dry_run: false,
        }
    }

    /// Only check which artifacts are missing; never start a session.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    /// Attempt every (dataset, year) task in `registry`.
    pub async fn run(&self, registry: &[DatasetDescriptor]) -> Result<BatchReport, BatchError> {
        if registry.is_empty() {
            return Err(BatchError::EmptyRegistry);
        }
        self.storage.ensure_target_dir()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Starting batch {} over {} datasets into {:?} (navigator: {}{})",
            run_id,
            registry.len(),
            self.storage.target_dir,
            self.navigator.name(),
            if self.dry_run { ", dry run" } else { "" }
        );

        let mut records = Vec::new();
        for descriptor in registry {
            let span = info_span!("dataset", id = %descriptor.id);
            let dataset_records = self.run_dataset(descriptor).instrument(span).await;
            records.extend(dataset_records);
        }

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: self.dry_run,
            records,
        };

        let totals = report.totals();
        info!(
            "Batch finished in {:?}: {} succeeded, {} skipped, {} failed, {} planned",
            report.duration(),
            totals.succeeded,
            totals.skipped,
            totals.failed,
            totals.planned
        );

        Ok(report)
    }

    async fn run_dataset(&self, descriptor: &DatasetDescriptor) -> Vec<TaskRecord> {
        if descriptor.years.is_empty() {
            warn!("No years configured for {}", descriptor.id);
        } else {
            info!("Processing {} ({})", descriptor.id, descriptor.years);
        }

        let mut records = Vec::with_capacity(descriptor.years.len());
        for task in descriptor.tasks() {
            let span = info_span!("task", year = task.year);
            records.push(self.run_task(task).instrument(span).await);
        }
        records
    }

    async fn run_task(&self, task: FetchTask<'_>) -> TaskRecord {
        let filename = task.filename();
        let start = Instant::now();

        let outcome = if self.storage.artifact_exists(&filename) {
            info!("{} already exists, skipping", filename);
            FetchOutcome::already_exists()
        } else if self.dry_run {
            info!("{} missing, would fetch", filename);
            FetchOutcome::Planned
        } else {
            let fetch = self
                .navigator
                .fetch(task.descriptor, task.year, &self.storage.target_dir);
            match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(Ok(())) => FetchOutcome::Succeeded,
                Ok(Err(e)) => {
                    error!("Failed to fetch {}: {}", filename, e);
                    FetchOutcome::failed(e)
                }
                Err(_) => {
                    error!("Navigator panicked while fetching {}", filename);
                    FetchOutcome::failed("navigator panicked")
                }
            }
        };

        TaskRecord {
            dataset_id: task.descriptor.id.clone(),
            year: task.year,
            filename,
            outcome,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Which years of a dataset are on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetInventory {
    pub dataset_id: String,
    pub present: Vec<i32>,
    pub missing: Vec<i32>,
}

/// Check every configured year against the target directory.
pub fn inventory(registry: &[DatasetDescriptor], storage: &StorageConfig) -> Vec<DatasetInventory> {
    registry
        .iter()
        .map(|descriptor| {
            let (present, missing): (Vec<i32>, Vec<i32>) = descriptor
                .years
                .iter()
                .partition(|year| storage.artifact_exists(&descriptor.filename_for(*year)));
            DatasetInventory {
                dataset_id: descriptor.id.clone(),
                present,
                missing,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FilenameTemplate, NavigationVariant, PageLocators, YearRange};
    use crate::navigator::{
        NavigationError, PageSession, ProtocolNavigator, SessionConfig, SessionLauncher, Step,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Navigator that "downloads" by writing the artifact, except for scripted failures.
    #[derive(Default)]
    struct RecordingNavigator {
        calls: Mutex<Vec<(String, i32)>>,
        fail: Vec<(String, i32)>,
    }

    impl RecordingNavigator {
        fn failing(fail: &[(&str, i32)]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: fail.iter().map(|(id, y)| (id.to_string(), *y)).collect(),
            }
        }

        fn calls(&self) -> Vec<(String, i32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageNavigator for RecordingNavigator {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn fetch(
            &self,
            descriptor: &DatasetDescriptor,
            year: i32,
            target_dir: &Path,
        ) -> Result<(), NavigationError> {
            let key = (descriptor.id.clone(), year);
            self.calls.lock().unwrap().push(key.clone());
            if descriptor.id == "panics" {
                panic!("navigator bug");
            }
            if self.fail.contains(&key) {
                return Err(NavigationError::Timeout {
                    step: Step::FormatDialog,
                });
            }
            std::fs::write(target_dir.join(descriptor.filename_for(year)), "a;b\n")?;
            Ok(())
        }
    }

    fn descriptor(id: &str, code: u32, start: i32, end: i32) -> DatasetDescriptor {
        DatasetDescriptor {
            id: id.to_string(),
            title: String::new(),
            base_location: format!("https://example.com/pub/?n={}", code),
            years: YearRange::exclusive(start, end),
            filename: FilenameTemplate::new(format!("t{}{{year}}00.csv", code)),
            variant: NavigationVariant::year_encoded(),
            locators: PageLocators::default(),
        }
    }

    fn calls(expected: &[(&str, i32)]) -> Vec<(String, i32)> {
        expected.iter().map(|(id, y)| (id.to_string(), *y)).collect()
    }

    #[tokio::test]
    async fn test_fetches_then_skips_on_rerun() {
        let temp_dir = TempDir::new().unwrap();
        let registry = vec![descriptor("d", 999, 2020, 2022)];
        let storage = StorageConfig::new(temp_dir.path().to_path_buf());

        let batch = BatchOrchestrator::new(RecordingNavigator::default(), storage.clone());
        let report = batch.run(&registry).await.unwrap();

        assert_eq!(batch.navigator().calls(), calls(&[("d", 2020), ("d", 2021)]));
        assert_eq!(report.outcome_for("d", 2020), Some(&FetchOutcome::Succeeded));
        assert_eq!(report.outcome_for("d", 2021), Some(&FetchOutcome::Succeeded));
        assert!(temp_dir.path().join("t999202000.csv").exists());
        assert!(temp_dir.path().join("t999202100.csv").exists());

        let rerun = BatchOrchestrator::new(RecordingNavigator::default(), storage);
        let report = rerun.run(&registry).await.unwrap();

        assert!(rerun.navigator().calls().is_empty());
        assert_eq!(report.totals().skipped, 2);
        assert_eq!(
            report.outcome_for("d", 2021),
            Some(&FetchOutcome::already_exists())
        );
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let registry = vec![
            descriptor("a", 1, 2020, 2022),
            descriptor("b", 2, 2019, 2021),
        ];
        let navigator = RecordingNavigator::failing(&[("a", 2020)]);
        let batch =
            BatchOrchestrator::new(navigator, StorageConfig::new(temp_dir.path().to_path_buf()));

        let report = batch.run(&registry).await.unwrap();

        assert_eq!(
            batch.navigator().calls(),
            calls(&[("a", 2020), ("a", 2021), ("b", 2019), ("b", 2020)])
        );
        assert!(matches!(
            report.outcome_for("a", 2020),
            Some(FetchOutcome::Failed { error }) if error.contains("format dialog")
        ));
        assert_eq!(report.outcome_for("a", 2021), Some(&FetchOutcome::Succeeded));
        assert_eq!(report.failures().count(), 1);

        let summaries = report.summaries();
        assert_eq!(
            summaries,
            vec![
                DatasetSummary {
                    dataset_id: "a".to_string(),
                    succeeded: 1,
                    failed: 1,
                    ..Default::default()
                },
                DatasetSummary {
                    dataset_id: "b".to_string(),
                    succeeded: 2,
                    ..Default::default()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_navigator_panic_is_contained() {
        let temp_dir = TempDir::new().unwrap();
        let registry = vec![
            descriptor("panics", 1, 2020, 2021),
            descriptor("ok", 2, 2020, 2021),
        ];
        let batch = BatchOrchestrator::new(
            RecordingNavigator::default(),
            StorageConfig::new(temp_dir.path().to_path_buf()),
        );

        let report = batch.run(&registry).await.unwrap();

        assert_eq!(
            report.outcome_for("panics", 2020),
            Some(&FetchOutcome::failed("navigator panicked"))
        );
        assert_eq!(report.outcome_for("ok", 2020), Some(&FetchOutcome::Succeeded));
    }

    /// Launcher with no browser behind it; counts how often it is asked.
    #[derive(Default)]
    struct NoBrowser {
        launches: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl SessionLauncher for NoBrowser {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn launch(
            &self,
            _config: &SessionConfig,
            download_dir: &Path,
        ) -> Result<Box<dyn PageSession>, NavigationError> {
            self.launches.lock().unwrap().push(download_dir.to_path_buf());
            Err(NavigationError::Launch("no browser installed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_unparseable_location_fails_every_year_and_continues() {
        let temp_dir = TempDir::new().unwrap();
        let mut broken = descriptor("broken", 1, 2020, 2022);
        broken.base_location = "not a url".to_string();
        let registry = vec![broken, descriptor("next", 2, 2020, 2021)];
        let batch = BatchOrchestrator::new(
            ProtocolNavigator::new(NoBrowser::default(), SessionConfig::default()),
            StorageConfig::new(temp_dir.path().to_path_buf()),
        );

        let report = batch.run(&registry).await.unwrap();

        for year in [2020, 2021] {
            assert!(matches!(
                report.outcome_for("broken", year),
                Some(FetchOutcome::Failed { error }) if error.contains("Invalid location not a url")
            ));
        }
        // The next dataset still gets its attempt.
        assert!(matches!(
            report.outcome_for("next", 2020),
            Some(FetchOutcome::Failed { error }) if error.contains("no browser installed")
        ));
        assert_eq!(report.records.len(), 3);
        let launches = batch.navigator().launcher().launches.lock().unwrap();
        assert_eq!(launches.as_slice(), &[temp_dir.path().to_path_buf()]);
    }

    #[tokio::test]
    async fn test_failed_year_is_retried_next_run() {
        let temp_dir = TempDir::new().unwrap();
        let registry = vec![descriptor("d", 999, 2020, 2022)];
        let storage = StorageConfig::new(temp_dir.path().to_path_buf());

        let first = BatchOrchestrator::new(RecordingNavigator::failing(&[("d", 2020)]), storage.clone());
        first.run(&registry).await.unwrap();

        let second = BatchOrchestrator::new(RecordingNavigator::default(), storage);
        let report = second.run(&registry).await.unwrap();

        assert_eq!(second.navigator().calls(), calls(&[("d", 2020)]));
        assert_eq!(report.outcome_for("d", 2020), Some(&FetchOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_only_missing_years_are_fetched() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("t999202100.csv"), "").unwrap();
        let registry = vec![descriptor("d", 999, 2020, 2023)];

        let batch = BatchOrchestrator::new(
            RecordingNavigator::default(),
            StorageConfig::new(temp_dir.path().to_path_buf()),
        );
        let report = batch.run(&registry).await.unwrap();

        assert_eq!(batch.navigator().calls(), calls(&[("d", 2020), ("d", 2022)]));
        assert_eq!(
            report.outcome_for("d", 2021),
            Some(&FetchOutcome::already_exists())
        );
    }

    #[tokio::test]
    async fn test_dry_run_never_fetches() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("t999202000.csv"), "").unwrap();
        let registry = vec![descriptor("d", 999, 2020, 2022)];

        let batch = BatchOrchestrator::new(
            RecordingNavigator::default(),
            StorageConfig::new(temp_dir.path().to_path_buf()),
        )
        .with_dry_run(true);
        let report = batch.run(&registry).await.unwrap();

        assert!(batch.navigator().calls().is_empty());
        assert!(report.dry_run);
        assert_eq!(report.outcome_for("d", 2021), Some(&FetchOutcome::Planned));
        assert_eq!(report.totals().skipped, 1);
    }

    #[tokio::test]
    async fn test_creates_target_dir() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("data");
        let registry = vec![descriptor("d", 999, 2020, 2021)];

        let batch =
            BatchOrchestrator::new(RecordingNavigator::default(), StorageConfig::new(target.clone()));
        let report = tokio_test::assert_ok!(batch.run(&registry).await);

        assert_eq!(report.totals().succeeded, 1);

        assert!(target.join("t999202000.csv").exists());
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let temp_dir = TempDir::new().unwrap();
        let batch = BatchOrchestrator::new(
            RecordingNavigator::default(),
            StorageConfig::new(temp_dir.path().to_path_buf()),
        );

        let err = tokio_test::assert_err!(batch.run(&[]).await);
        assert!(matches!(err, BatchError::EmptyRegistry));
    }

    #[tokio::test]
    async fn test_report_serialization() {
        let temp_dir = TempDir::new().unwrap();
        let registry = vec![descriptor("d", 999, 2020, 2021)];
        let batch = BatchOrchestrator::new(
            RecordingNavigator::failing(&[("d", 2020)]),
            StorageConfig::new(temp_dir.path().to_path_buf()),
        );

        let report = batch.run(&registry).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["records"][0]["filename"], "t999202000.csv");
        assert_eq!(json["records"][0]["outcome"]["status"], "failed");
    }

    #[test]
    fn test_inventory() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("t999202100.csv"), "").unwrap();
        let registry = vec![descriptor("d", 999, 2020, 2023)];

        let inv = inventory(&registry, &StorageConfig::new(temp_dir.path().to_path_buf()));

        assert_eq!(
            inv,
            vec![DatasetInventory {
                dataset_id: "d".to_string(),
                present: vec![2021],
                missing: vec![2020, 2022],
            }]
        );
    }
}
