//! Test: Failure handling - failing substeps are all reported

use crate::helpers::*;
use steppipe::core::StepDefinition;
use steppipe::{PipelineError, RunAllOptions};

#[tokio::test]
async fn test_two_of_five_files_fail() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(
        dir.path(),
        &["a.txt", "bad_b.txt", "c.txt", "bad_d.txt", "e.txt"],
    );
    let counter = CallCounter::default();
    let (mut pipeline, _) = open("failures", dir.path(), registry(&counter)).await;
    pipeline
        .add(
            StepDefinition::function("picky", "mark_unless_bad")
                .files(files.clone())
                .parallel(Some(2)),
        )
        .await
        .unwrap();

    let err = pipeline.run("picky").await.unwrap_err();
    let expected = vec![files[1].display().to_string(), files[3].display().to_string()];
    assert_eq!(err.failed_substeps(), Some(expected.as_slice()));
    assert!(matches!(err, PipelineError::AggregateFailure { ref step, .. } if step == "picky"));

    // every substep still ran
    assert_eq!(counter.get(), 5);

    let step = pipeline.step("picky").unwrap();
    assert!(step.failed);
    assert!(!step.done);
    let flags: Vec<(bool, bool)> = step
        .substeps
        .iter()
        .flatten()
        .map(|s| (s.done, s.failed))
        .collect();
    assert_eq!(
        flags,
        vec![(true, false), (false, true), (true, false), (false, true), (true, false)]
    );
    let raised = step.substeps.as_ref().unwrap()[1]
        .last_result
        .as_ref()
        .and_then(|r| r.raised_error.clone())
        .unwrap();
    assert!(raised.contains("refusing"));
}

#[tokio::test]
async fn test_run_all_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(dir.path(), &["ok.txt", "bad.txt"]);
    let counter = CallCounter::default();
    let (mut pipeline, _) = open("stop", dir.path(), registry(&counter)).await;
    pipeline
        .add(StepDefinition::function("picky", "mark_unless_bad").files(files))
        .await
        .unwrap();
    pipeline
        .add(StepDefinition::command("after", "true"))
        .await
        .unwrap();

    assert!(pipeline.run_all(RunAllOptions::default()).await.is_err());
    assert!(pipeline.step("picky").unwrap().failed);
    let after = pipeline.step("after").unwrap();
    assert!(!after.done && !after.failed);
    assert_eq!(pipeline.current(), Some("picky"));
}

#[tokio::test]
async fn test_failing_command_keeps_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, _) = open("cmd", dir.path(), registry(&CallCounter::default())).await;
    pipeline
        .add(StepDefinition::command("listing", "ls").args(steppipe::Args::strings([
            "nonexistent_path_xyz",
        ])))
        .await
        .unwrap();

    let err = pipeline.run("listing").await.unwrap_err();
    match err {
        PipelineError::ExecutionFailure { exit_code, details, .. } => {
            assert_ne!(exit_code, Some(0));
            assert!(details.contains("nonexistent_path_xyz"));
        }
        other => panic!("expected an execution failure, got {other}"),
    }
    let step = pipeline.step("listing").unwrap();
    assert!(step.failed);
    assert!(!step.done);
}
