//! Test: Resume from saved state

use crate::helpers::*;
use std::sync::Arc;
use steppipe::core::StepDefinition;
use steppipe::{Args, JsonFileStore, PipelineConfig, RunAllOptions, SnapshotStore, TestSpec};

#[tokio::test]
async fn test_resume_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state").join("resume.json");
    let files = make_files(dir.path(), &["a.txt", "bad.txt"]);
    let counter = CallCounter::default();

    let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(&state));
    let mut pipeline = open_with("resume", dir.path(), registry(&counter), store.clone()).await;
    pipeline
        .add(
            StepDefinition::function("first", "mark")
                .args(Args::strings([files[0].display().to_string()])),
        )
        .await
        .unwrap();
    pipeline
        .add(
            StepDefinition::function("second", "mark_unless_bad")
                .args(Args::strings([files[1].display().to_string()])),
        )
        .await
        .unwrap();
    assert!(pipeline.run_all(RunAllOptions::default()).await.is_err());
    assert_eq!(counter.get(), 2);
    assert!(state.exists());
    drop(pipeline);

    // a fresh process: new registry, state only from disk
    let counter = CallCounter::default();
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(&state));
    let mut pipeline = open_with("resume", dir.path(), registry(&counter), store).await;
    assert_eq!(pipeline.len(), 2);
    assert!(pipeline.step("first").unwrap().done);
    assert!(pipeline.step("second").unwrap().failed);
    assert_eq!(pipeline.current(), Some("second"));

    // fix the input and rerun from the current step
    let fixed = dir.path().canonicalize().unwrap().join("fixed.txt");
    std::fs::write(&fixed, "ok").unwrap();
    pipeline.delete("second").await.unwrap();
    pipeline
        .add(
            StepDefinition::function("second", "mark_unless_bad")
                .args(Args::strings([fixed.display().to_string()])),
        )
        .await
        .unwrap();
    pipeline.run_all(RunAllOptions::default()).await.unwrap();

    assert_eq!(counter.get(), 1);
    assert!(pipeline.steps().all(|s| s.done && !s.failed));
    assert!(done_marker(&fixed).exists());
}

#[tokio::test]
async fn test_interrupted_fanout_keeps_finished_substeps() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("fanout.json");
    let files = make_files(dir.path(), &["a.txt", "b.txt", "bad.txt"]);
    let counter = CallCounter::default();

    let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(&state));
    let mut pipeline = open_with("fanout", dir.path(), registry(&counter), store.clone()).await;
    pipeline
        .add(
            StepDefinition::function("picky", "mark_unless_bad")
                .files(files.clone())
                .donetest(TestSpec::with_args("exists", Args::strings(["<StepFile>.done"]))),
        )
        .await
        .unwrap();
    assert!(pipeline.run("picky").await.is_err());
    assert_eq!(counter.get(), 3);

    let snapshot = store.load("fanout").await.unwrap().unwrap();
    let substeps = snapshot.steps[0].substeps.as_ref().unwrap();
    assert_eq!(substeps.iter().filter(|s| s.done).count(), 2);
    assert!(substeps[2].failed);

    // only the failed substep runs again
    let counter = CallCounter::default();
    let mut pipeline = open_with("fanout", dir.path(), registry(&counter), store).await;
    assert!(pipeline.run("picky").await.is_err());
    assert_eq!(counter.get(), 1);
}

#[tokio::test]
async fn test_config_apply_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("cfg.json");
    let yaml = r#"
name: "cfg"
steps:
  - name: "list"
    command: "ls"
  - name: "echo"
    command: "echo hello"
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();

    let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(&state));
    let mut pipeline =
        open_with("cfg", dir.path(), registry(&CallCounter::default()), store.clone()).await;
    assert_eq!(config.apply(&mut pipeline).await.unwrap(), 2);
    pipeline.run("current").await.unwrap();

    let mut pipeline =
        open_with("cfg", dir.path(), registry(&CallCounter::default()), store).await;
    assert_eq!(config.apply(&mut pipeline).await.unwrap(), 0);
    assert_eq!(pipeline.current(), Some("echo"));
    pipeline.run("current").await.unwrap();
    let echo = pipeline.step("echo").unwrap();
    assert!(echo.done);
    assert_eq!(
        echo.last_result.as_ref().and_then(|r| r.output.as_deref()),
        Some("hello")
    );
}
