//! Test: Serial fan-out over discovered files

use crate::helpers::*;
use steppipe::core::{RunAllOptions, RunPolicy, StepDefinition};
use steppipe::{Args, PipelineError, SnapshotStore, TestSpec};

#[tokio::test]
async fn test_command_fanout_touches_every_file() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(dir.path(), &["a.txt", "b.txt", "c.txt"]);
    make_files(dir.path(), &["notes.md"]);
    let (mut pipeline, _) = open("touch", dir.path(), registry(&CallCounter::default())).await;

    pipeline
        .add(
            StepDefinition::command("touch_all", "touch")
                .args(Args::strings(["<StepFile>.done"]))
                .file_pattern(r".*\.txt$")
                .donetest(TestSpec::with_args("exists", Args::strings(["<StepFile>.done"]))),
        )
        .await
        .unwrap();
    pipeline.run("touch_all").await.unwrap();

    let step = pipeline.step("touch_all").unwrap();
    assert!(step.done);
    assert!(!step.failed);
    let substeps = step.substeps.as_ref().unwrap();
    assert_eq!(substeps.len(), files.len());
    for (substep, file) in substeps.iter().zip(&files) {
        assert_eq!(substep.name, file.display().to_string());
        assert!(substep.done);
        assert!(!substep.args.contains_placeholder());
        assert!(!substep.donetest.args().contains_placeholder());
        assert!(done_marker(file).exists());
    }
}

#[tokio::test]
async fn test_completed_substeps_are_not_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(dir.path(), &["one.dat", "two.dat", "three.dat"]);
    let counter = CallCounter::default();
    let (mut pipeline, _) = open("mark", dir.path(), registry(&counter)).await;

    pipeline
        .add(
            StepDefinition::function("mark", "mark")
                .files(files.clone())
                .donetest(TestSpec::with_args("exists", Args::strings(["<StepFile>.done"]))),
        )
        .await
        .unwrap();

    pipeline.run("mark").await.unwrap();
    assert_eq!(counter.get(), 3);
    assert!(pipeline.step("mark").unwrap().done);

    pipeline.run("mark").await.unwrap();
    assert_eq!(counter.get(), 3);

    pipeline.run_step("mark", RunPolicy::forced()).await.unwrap();
    assert_eq!(counter.get(), 6);
    assert!(pipeline.step("mark").unwrap().done);
}

#[tokio::test]
async fn test_two_segment_pattern_descends_one_level() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("batch1")).unwrap();
    std::fs::create_dir(dir.path().join("other")).unwrap();
    let inside = make_files(&dir.path().join("batch1"), &["x.fq", "y.fq"]);
    make_files(&dir.path().join("other"), &["z.fq"]);
    make_files(dir.path(), &["top.fq"]);

    let counter = CallCounter::default();
    let (mut pipeline, _) = open("nested", dir.path(), registry(&counter)).await;
    pipeline
        .add(StepDefinition::function("mark", "mark").file_pattern(r"batch.*/.*\.fq$"))
        .await
        .unwrap();
    pipeline.run("mark").await.unwrap();

    let names: Vec<String> = pipeline
        .step("mark")
        .unwrap()
        .substeps
        .iter()
        .flatten()
        .map(|s| s.name.clone())
        .collect();
    let expected: Vec<String> = inside.iter().map(|p| p.display().to_string()).collect();
    assert_eq!(names, expected);
    assert_eq!(counter.get(), 2);
}

#[tokio::test]
async fn test_pattern_without_matches_runs_step_directly() {
    let dir = tempfile::tempdir().unwrap();
    let counter = CallCounter::default();
    let (mut pipeline, store) = open("empty", dir.path(), registry(&counter)).await;

    pipeline
        .add(StepDefinition::command("fan", "true").file_pattern(r".*\.none"))
        .await
        .unwrap();
    pipeline
        .add(
            StepDefinition::function("per_file", "mark")
                .args(Args::strings(["<StepFile>"]))
                .file_pattern(r".*\.none"),
        )
        .await
        .unwrap();

    let err = pipeline
        .run_all(RunAllOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoFiles { .. }));

    let fan = pipeline.step("fan").unwrap();
    assert!(fan.done && !fan.failed);
    assert!(fan.substeps.is_none());
    assert_eq!(fan.last_result.as_ref().and_then(|r| r.exit_code), Some(0));

    let per_file = pipeline.step("per_file").unwrap();
    assert!(per_file.failed && !per_file.done);
    assert_eq!(counter.get(), 0);
    assert_eq!(pipeline.current(), Some("per_file"));

    let saved = store.load("empty").await.unwrap().unwrap();
    assert!(saved.steps.iter().any(|s| s.name == "fan" && s.done));
}
