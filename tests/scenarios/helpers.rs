//! Test utility functions for steppipe scenarios

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use steppipe::{CallError, InMemoryStore, Pipeline, Registry, SnapshotStore};

/// Counts calls of a registered function
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// First positional argument as a path
pub fn path_arg(args: &steppipe::Args) -> Result<PathBuf, CallError> {
    args.get_str(0, "file")
        .map(PathBuf::from)
        .ok_or_else(|| CallError::from("expected a file argument"))
}

/// Built-in predicates plus:
/// - `mark`: writes `<file>.done`
/// - `mark_unless_bad`: like `mark`, but fails for files whose name contains "bad"
/// - `write`: writes `[path, text]`
pub fn registry(counter: &CallCounter) -> Registry {
    let mark_counter = counter.clone();
    let picky_counter = counter.clone();
    Registry::with_builtins()
        .with_function("mark", move |args| {
            mark_counter.hit();
            let file = path_arg(args)?;
            std::fs::write(done_marker(&file), "done")?;
            Ok(json!(file.display().to_string()))
        })
        .with_function("mark_unless_bad", move |args| {
            picky_counter.hit();
            let file = path_arg(args)?;
            if file.to_string_lossy().contains("bad") {
                return Err(CallError(format!("refusing {}", file.display())));
            }
            std::fs::write(done_marker(&file), "done")?;
            Ok(Value::Null)
        })
        .with_function("write", |args| {
            let path = path_arg(args)?;
            let text = args.get_str(1, "text").unwrap_or_default();
            std::fs::write(path, text)?;
            Ok(Value::Null)
        })
}

pub fn done_marker(file: &Path) -> PathBuf {
    PathBuf::from(format!("{}.done", file.display()))
}

/// Create empty files in `dir` and return their absolute paths in order
pub fn make_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    let dir = dir.canonicalize().unwrap();
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, name).unwrap();
            path
        })
        .collect()
}

pub async fn open(name: &str, root: &Path, registry: Registry) -> (Pipeline, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = open_with(name, root, registry, store.clone()).await;
    (pipeline, store)
}

pub async fn open_with(
    name: &str,
    root: &Path,
    registry: Registry,
    store: Arc<dyn SnapshotStore>,
) -> Pipeline {
    Pipeline::open(name, root, registry, store).await.unwrap()
}
