//! Test: Pretest and donetest gating

use crate::helpers::*;
use serde_json::json;
use steppipe::core::{Gate, StepDefinition};
use steppipe::{Args, TestSpec};

#[tokio::test]
async fn test_write_then_check() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.txt");
    let bad = dir.path().join("bad.txt");
    let (mut pipeline, _) = open("gates", dir.path(), registry(&CallCounter::default())).await;

    let check = |path: &std::path::Path| {
        TestSpec::with_args(
            "file_contains",
            Args::from_value(json!([path.display().to_string(), "hello"])),
        )
    };
    pipeline
        .add(
            StepDefinition::function("write_good", "write")
                .args(Args::from_value(json!([good.display().to_string(), "hello\n"])))
                .donetest(check(&good)),
        )
        .await
        .unwrap();
    pipeline
        .add(
            StepDefinition::function("write_bad", "write")
                .args(Args::from_value(json!([bad.display().to_string(), "goodbye"])))
                .donetest(check(&bad)),
        )
        .await
        .unwrap();

    pipeline.run("write_good").await.unwrap();
    let step = pipeline.step("write_good").unwrap();
    assert!(step.done);
    assert!(!step.failed_donetest);

    let err = pipeline.run("write_bad").await.unwrap_err();
    assert_eq!(err.gate(), Some(Gate::Donetest));
    let step = pipeline.step("write_bad").unwrap();
    assert!(!step.done);
    assert!(step.failed);
    assert!(step.failed_donetest);
    assert_eq!(std::fs::read_to_string(&bad).unwrap(), "goodbye");
}

#[tokio::test]
async fn test_failed_pretest_never_runs_the_unit() {
    let dir = tempfile::tempdir().unwrap();
    let counter = CallCounter::default();
    let (mut pipeline, _) = open("pretest", dir.path(), registry(&counter)).await;
    let missing = dir.path().join("input.txt");

    pipeline
        .add(
            StepDefinition::function("needs_input", "mark")
                .args(Args::strings([missing.display().to_string()]))
                .pretest(TestSpec::with_args(
                    "exists",
                    Args::strings([missing.display().to_string()]),
                )),
        )
        .await
        .unwrap();

    let err = pipeline.run("needs_input").await.unwrap_err();
    assert_eq!(err.gate(), Some(Gate::Pretest));
    assert_eq!(counter.get(), 0);
    let step = pipeline.step("needs_input").unwrap();
    assert!(step.failed_pretest);
    assert!(step.last_result.is_none());
    assert!(!step.done);

    std::fs::write(&missing, "data").unwrap();
    pipeline.run("needs_input").await.unwrap();
    assert_eq!(counter.get(), 1);
    let step = pipeline.step("needs_input").unwrap();
    assert!(step.done);
    assert!(!step.failed_pretest);
}

#[tokio::test]
async fn test_passing_donetest_skips_the_unit() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(dir.path(), &["already.txt"]);
    std::fs::write(done_marker(&files[0]), "done").unwrap();
    let counter = CallCounter::default();
    let (mut pipeline, _) = open("skip", dir.path(), registry(&counter)).await;

    pipeline
        .add(
            StepDefinition::function("mark", "mark")
                .args(Args::strings([files[0].display().to_string()]))
                .donetest(TestSpec::with_args(
                    "exists",
                    Args::strings([done_marker(&files[0]).display().to_string()]),
                )),
        )
        .await
        .unwrap();

    pipeline.run("mark").await.unwrap();
    assert_eq!(counter.get(), 0);
    let step = pipeline.step("mark").unwrap();
    assert!(step.done);
    assert!(step.last_result.is_none());
}

#[tokio::test]
async fn test_check_marks_done_without_running() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.txt");
    let counter = CallCounter::default();
    let (mut pipeline, _) = open("check", dir.path(), registry(&counter)).await;
    pipeline
        .add(
            StepDefinition::function("produce", "mark")
                .args(Args::strings([target.display().to_string()]))
                .donetest(TestSpec::with_args(
                    "exists",
                    Args::strings([target.display().to_string()]),
                )),
        )
        .await
        .unwrap();

    assert!(!pipeline.check("produce", Default::default()).await.unwrap());
    assert!(!pipeline.step("produce").unwrap().done);

    std::fs::write(&target, "made elsewhere").unwrap();
    assert!(pipeline.check("produce", Default::default()).await.unwrap());
    assert!(pipeline.step("produce").unwrap().done);
    assert_eq!(counter.get(), 0);
    assert_eq!(pipeline.current(), None);
}
