//! Built-in predicates for pretests and donetests

use crate::core::args::Args;
use crate::core::registry::{CallError, Registry};
use serde_json::Value;
use std::path::Path;

/// Number of trailing lines searched by `tail_match`
const TAIL_LINES: usize = 20;

pub(crate) fn register_builtins(registry: &mut Registry) {
    registry
        .register_predicate("exists", exists)
        .register_predicate("file_contains", file_contains)
        .register_predicate("tail_match", tail_match);
}

/// True if every listed path exists.
///
/// Accepts a single path, a list of paths, or a mapping of path to
/// `"file"`/`"directory"`. An optional second argument (`kind`) restricts
/// plain paths to files or directories.
pub fn exists(args: &Args) -> Result<Value, CallError> {
    let kind = args.get_str(1, "kind");
    let targets = args
        .get(0, "file_list")
        .ok_or_else(|| CallError::from("exists needs a path or list of paths"))?;

    let ok = match targets {
        Value::String(path) => path_matches(path, kind),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(|p| path_matches(p, kind)))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CallError::from("exists expects string paths"))?
            .into_iter()
            .all(|b| b),
        Value::Object(map) => map
            .iter()
            .all(|(path, kind)| path_matches(path, kind.as_str())),
        other => return Err(CallError(format!("exists cannot check {}", other))),
    };
    Ok(Value::Bool(ok))
}

fn path_matches(path: &str, kind: Option<&str>) -> bool {
    let path = Path::new(path);
    match kind {
        Some("file") => path.is_file(),
        Some("directory") => path.is_dir(),
        _ => path.exists(),
    }
}

/// True if the file's content, with trailing whitespace removed, equals the
/// expected string. A missing file is an error, not a `false`.
pub fn file_contains(args: &Args) -> Result<Value, CallError> {
    let filename = args
        .get_str(0, "filename")
        .ok_or_else(|| CallError::from("file_contains needs a filename"))?;
    let expected = args.get_str(1, "string").unwrap_or("");
    let content = std::fs::read_to_string(filename)
        .map_err(|e| CallError(format!("{}: {}", filename, e)))?;
    Ok(Value::Bool(content.trim_end() == expected))
}

/// True if any of the last lines of every listed file contains the match
/// string.
pub fn tail_match(args: &Args) -> Result<Value, CallError> {
    let match_string = args
        .get_str(1, "match_string")
        .ok_or_else(|| CallError::from("tail_match needs a match string"))?;
    let files: Vec<&str> = match args.get(0, "file_list") {
        Some(Value::String(path)) => vec![path.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => return Err(CallError::from("tail_match needs a file or list of files")),
    };

    for file in files {
        let content =
            std::fs::read_to_string(file).map_err(|e| CallError(format!("{}: {}", file, e)))?;
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(TAIL_LINES);
        if !lines[start..].iter().any(|line| line.contains(match_string)) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}
