//! Test: Parallel fan-out on a bounded worker pool

use crate::helpers::*;
use steppipe::core::StepDefinition;
use steppipe::{Args, TestSpec};

fn definition(files: Vec<std::path::PathBuf>) -> StepDefinition {
    StepDefinition::function("mark", "mark")
        .args(Args::strings(["<StepFile>"]))
        .files(files)
        .donetest(TestSpec::with_args("exists", Args::strings(["<StepFile>.done"])))
}

#[tokio::test]
async fn test_five_files_on_three_workers() {
    let dir = tempfile::tempdir().unwrap();
    let files = make_files(dir.path(), &["1.txt", "2.txt", "3.txt", "4.txt", "5.txt"]);
    let counter = CallCounter::default();
    let (mut pipeline, _) = open("parallel", dir.path(), registry(&counter)).await;

    pipeline.add(definition(files.clone())).await.unwrap();
    pipeline.run_parallel("mark", Some(3)).await.unwrap();

    let step = pipeline.step("mark").unwrap();
    assert!(step.done);
    assert!(!step.failed);
    assert_eq!(counter.get(), 5);
    for (substep, file) in step.substeps.iter().flatten().zip(&files) {
        assert!(substep.done);
        assert!(done_marker(file).exists());
        assert_eq!(
            substep.last_result.as_ref().and_then(|r| r.output.clone()),
            Some(file.display().to_string())
        );
    }
}

#[tokio::test]
async fn test_parallel_and_serial_agree() {
    let serial_dir = tempfile::tempdir().unwrap();
    let parallel_dir = tempfile::tempdir().unwrap();
    let names = ["a.txt", "bad_b.txt", "c.txt", "bad_d.txt", "e.txt"];
    let serial_files = make_files(serial_dir.path(), &names);
    let parallel_files = make_files(parallel_dir.path(), &names);

    let flags = |pipeline: &steppipe::Pipeline| -> Vec<(bool, bool)> {
        pipeline
            .step("picky")
            .unwrap()
            .substeps
            .iter()
            .flatten()
            .map(|s| (s.done, s.failed))
            .collect()
    };

    let (mut serial, _) = open("serial", serial_dir.path(), registry(&CallCounter::default())).await;
    serial
        .add(StepDefinition::function("picky", "mark_unless_bad").files(serial_files))
        .await
        .unwrap();
    let serial_err = serial.run("picky").await.unwrap_err();

    let (mut parallel, _) =
        open("parallel", parallel_dir.path(), registry(&CallCounter::default())).await;
    parallel
        .add(
            StepDefinition::function("picky", "mark_unless_bad")
                .files(parallel_files)
                .parallel(Some(3)),
        )
        .await
        .unwrap();
    let parallel_err = parallel.run("picky").await.unwrap_err();

    assert_eq!(flags(&serial), flags(&parallel));
    let strip = |failed: &[String]| -> Vec<String> {
        failed
            .iter()
            .map(|f| f.rsplit('/').next().unwrap_or_default().to_string())
            .collect()
    };
    assert_eq!(
        strip(serial_err.failed_substeps().unwrap()),
        strip(parallel_err.failed_substeps().unwrap())
    );
}
