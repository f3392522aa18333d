// tests/artifact_watch.rs
mod common;
use crate::common::builders::{ConfigFileBuilder, StageConfigBuilder};
use crate::common::init_tracing;

use std::error::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use stagedag::engine::SchedulerEvent;
use stagedag::watch::{affected_artifact, artifact_targets, spawn_watcher};
use tempfile::tempdir;
use tokio::sync::mpsc;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn targets_are_resolved_sorted_and_unique() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    fs::create_dir_all(dir.path().join("inbox"))?;
    fs::write(dir.path().join("inbox/orders.csv"), "id\n")?;

    let cfg = ConfigFileBuilder::new()
        .with_stage("ingest", StageConfigBuilder::new().artifact("inbox/orders.csv").build())
        .with_stage("audit", StageConfigBuilder::new().artifact("inbox/orders.csv").build())
        .with_stage("load", StageConfigBuilder::new().artifact("landing").build())
        .with_stage("report", StageConfigBuilder::new().every("1h").build())
        .build();

    let root = dir.path().canonicalize()?;
    let targets = artifact_targets(&cfg.graph, &root);
    assert_eq!(targets, [root.join("inbox/orders.csv"), root.join("landing")]);
    Ok(())
}

#[test]
fn changes_map_to_the_artifact_they_touch() {
    let targets = vec![
        Path::new("/data/inbox/orders.csv").to_path_buf(),
        Path::new("/data/landing").to_path_buf(),
    ];

    assert_eq!(
        affected_artifact(&targets, Path::new("/data/inbox/orders.csv")),
        Some(&targets[0])
    );
    assert_eq!(
        affected_artifact(&targets, Path::new("/data/landing/part-0001.parquet")),
        Some(&targets[1])
    );
    assert_eq!(affected_artifact(&targets, Path::new("/data/inbox/other.csv")), None);
    assert_eq!(affected_artifact(&targets, Path::new("/data/landing-old/x")), None);
}

#[tokio::test]
async fn no_watcher_without_artifact_triggers() -> TestResult {
    crate::common::with_timeout(async {
        let dir = tempdir()?;
        let cfg = ConfigFileBuilder::new()
            .with_stage("report", StageConfigBuilder::new().every("1h").build())
            .build();
        let (tx, _rx) = mpsc::channel(8);
        assert!(spawn_watcher(&cfg.graph, dir.path(), tx)?.is_none());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn creating_a_watched_artifact_wakes_the_scheduler() -> TestResult {
    crate::common::with_timeout(async {
        let dir = tempdir()?;
        let root = dir.path().canonicalize()?;
        let cfg = ConfigFileBuilder::new()
            .with_stage("ingest", StageConfigBuilder::new().artifact("orders.csv").build())
            .build();

        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn_watcher(&cfg.graph, &root, tx)?.expect("artifact trigger present");
        assert_eq!(handle.targets(), [root.join("orders.csv")]);

        // Give the backend a moment to register before touching the file.
        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(root.join("unrelated.txt"), "x")?;
        fs::write(root.join("orders.csv"), "id,qty\n1,2\n")?;

        let event = rx.recv().await.expect("watcher sends an event");
        match event {
            SchedulerEvent::ArtifactChanged { path } => assert_eq!(path, root.join("orders.csv")),
            other => panic!("unexpected event {other:?}"),
        }
        drop(handle);
        Ok(())
    })
    .await
}
