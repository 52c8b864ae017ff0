//! Filesystem Store Integration Tests
//!
//! Runs the pipeline against real files, manipulating modification
//! times with `filetime` to simulate edits made at different moments.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use filetime::{set_file_mtime, FileTime};
use placejoin::adapters::{Executor, StageOutput};
use placejoin::core::graph::Stage;
use placejoin::core::{Driver, FsStore, RunOptions, StageError};
use tempfile::TempDir;

const OUTPUTS: [&str; 5] = [
    "ie-places.osm.pbf",
    "ie-boundaries.osm.pbf",
    "ie-places.imported",
    "ie-boundaries.imported",
    "ie-placesinboundaries.csv.gz",
];

/// Writes each file output; markers are left to the store
#[derive(Default)]
struct FileWritingExecutor {
    calls: Mutex<Vec<String>>,
    skip_write: bool,
}

impl FileWritingExecutor {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Executor for FileWritingExecutor {
    fn name(&self) -> &str {
        "file-writing"
    }

    async fn execute(
        &self,
        stage: &Stage,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<StageOutput, StageError> {
        self.calls.lock().unwrap().push(stage.name.clone());
        for input in inputs {
            assert!(input.exists(), "{} should exist before {}", input.display(), stage.name);
        }
        if !stage.output.is_marker() && !self.skip_write {
            fs::write(output, stage.name.as_bytes()).map_err(|e| StageError::store(output, e))?;
        }
        Ok(StageOutput::default())
    }
}

fn setup() -> (TempDir, PathBuf, FsStore) {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("ie.osm.pbf");
    fs::write(&input, b"extract").unwrap();
    let store = FsStore::open(temp.path().join("out")).unwrap();
    (temp, input, store)
}

fn set_mtime(path: &Path, time: SystemTime) {
    set_file_mtime(path, FileTime::from_system_time(time)).unwrap();
}

#[tokio::test]
async fn test_full_run_writes_every_artifact() {
    let (_temp, input, store) = setup();
    let executor = FileWritingExecutor::default();

    let report = Driver::new(&store, &executor)
        .run(&input, &RunOptions::default())
        .await
        .unwrap();

    for output in OUTPUTS {
        assert!(store.root().join(output).exists(), "{} missing", output);
    }
    assert_eq!(
        report.export,
        Some(store.root().join("ie-placesinboundaries.csv.gz"))
    );
    assert_eq!(executor.calls().len(), 5);
}

#[tokio::test]
async fn test_equal_timestamps_count_as_fresh() {
    let (_temp, input, store) = setup();
    let executor = FileWritingExecutor::default();
    let driver = Driver::new(&store, &executor);

    driver.run(&input, &RunOptions::default()).await.unwrap();
    executor.reset();

    let instant = SystemTime::now() - Duration::from_secs(600);
    set_mtime(&input, instant);
    for output in OUTPUTS {
        set_mtime(&store.root().join(output), instant);
    }

    let report = driver.run(&input, &RunOptions::default()).await.unwrap();
    assert!(report.is_noop());
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_newer_input_reruns_pipeline() {
    let (_temp, input, store) = setup();
    let executor = FileWritingExecutor::default();
    let driver = Driver::new(&store, &executor);

    driver.run(&input, &RunOptions::default()).await.unwrap();
    executor.reset();

    let now = SystemTime::now();
    for output in OUTPUTS {
        set_mtime(&store.root().join(output), now - Duration::from_secs(3600));
    }
    set_mtime(&input, now - Duration::from_secs(1800));

    driver.run(&input, &RunOptions::default()).await.unwrap();
    assert_eq!(
        executor.calls(),
        vec![
            "filter-places",
            "filter-boundaries",
            "import-places",
            "import-boundaries",
            "spatial-join-export"
        ]
    );

    // Freshly produced outputs are newer than the backdated input
    executor.reset();
    driver.run(&input, &RunOptions::default()).await.unwrap();
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_backdated_place_marker_reruns_join_only() {
    let (_temp, input, store) = setup();
    let executor = FileWritingExecutor::default();
    let driver = Driver::new(&store, &executor);

    driver.run(&input, &RunOptions::default()).await.unwrap();
    executor.reset();

    let now = SystemTime::now();
    set_mtime(&input, now - Duration::from_secs(7200));
    for output in OUTPUTS {
        set_mtime(&store.root().join(output), now - Duration::from_secs(3600));
    }
    // Marker written after the export
    set_mtime(&store.root().join("ie-places.imported"), now - Duration::from_secs(60));

    driver.run(&input, &RunOptions::default()).await.unwrap();
    assert_eq!(executor.calls(), vec!["spatial-join-export"]);
}

#[tokio::test]
async fn test_unwritten_file_output_is_store_error() {
    let (_temp, input, store) = setup();
    let executor = FileWritingExecutor {
        skip_write: true,
        ..FileWritingExecutor::default()
    };

    let err = Driver::new(&store, &executor)
        .run(&input, &RunOptions::default())
        .await
        .unwrap_err();

    let stage_error = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<StageError>())
        .expect("a stage error in the chain");
    assert!(matches!(stage_error, StageError::Store { .. }));
    assert_eq!(executor.calls(), vec!["filter-places"]);
}
