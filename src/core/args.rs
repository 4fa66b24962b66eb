//! Tagged call arguments shared by commands, functions and gates

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Token replaced by a file path when a step fans out over a file list
pub const PLACEHOLDER: &str = "<StepFile>";

/// Arguments passed to a unit of work or a predicate.
///
/// The shape is decided once, when the step is defined, and is never
/// re-inspected when the step runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "shape", content = "value", rename_all = "lowercase")]
pub enum Args {
    /// No arguments
    #[default]
    None,
    /// An ordered list of arguments
    Positional(Vec<Value>),
    /// Arguments by name
    Named(BTreeMap<String, Value>),
    /// A single bare argument
    Single(Value),
}

impl Args {
    /// Build arguments from a loosely typed value (as found in YAML or JSON)
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Args::None,
            Value::Array(items) => Args::Positional(items),
            Value::Object(map) => Args::Named(map.into_iter().collect()),
            other => Args::Single(other),
        }
    }

    /// Convenience constructor for a list of strings
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Args::Positional(items.into_iter().map(|s| Value::String(s.into())).collect())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Args::None)
    }

    /// True if any string value, at any depth, contains the placeholder.
    /// Mapping keys are never inspected.
    pub fn contains_placeholder(&self) -> bool {
        match self {
            Args::None => false,
            Args::Positional(items) => items.iter().any(value_has_placeholder),
            Args::Named(map) => map.values().any(value_has_placeholder),
            Args::Single(value) => value_has_placeholder(value),
        }
    }

    /// Copy of these arguments with every placeholder replaced by `file`
    pub fn substitute(&self, file: &str) -> Self {
        match self {
            Args::None => Args::None,
            Args::Positional(items) => {
                Args::Positional(items.iter().map(|v| substitute_value(v, file)).collect())
            }
            Args::Named(map) => Args::Named(
                map.iter()
                    .map(|(k, v)| (k.clone(), substitute_value(v, file)))
                    .collect(),
            ),
            Args::Single(value) => Args::Single(substitute_value(value, file)),
        }
    }

    /// Copy of these arguments with `file` added as the last positional
    /// argument. Named arguments have no "last" slot, so this returns `None`.
    pub fn append(&self, file: &str) -> Option<Self> {
        let file = Value::String(file.to_string());
        match self {
            Args::None => Some(Args::Positional(vec![file])),
            Args::Positional(items) => {
                let mut items = items.clone();
                items.push(file);
                Some(Args::Positional(items))
            }
            Args::Single(value) => Some(Args::Positional(vec![value.clone(), file])),
            Args::Named(_) => None,
        }
    }

    /// Positional argument at `index`; a single argument counts as index 0
    pub fn positional(&self, index: usize) -> Option<&Value> {
        match self {
            Args::Positional(items) => items.get(index),
            Args::Single(value) if index == 0 => Some(value),
            _ => None,
        }
    }

    /// Named argument `key`
    pub fn named(&self, key: &str) -> Option<&Value> {
        match self {
            Args::Named(map) => map.get(key),
            _ => None,
        }
    }

    /// Look an argument up either by position or by name, whichever shape
    /// the caller used
    pub fn get(&self, index: usize, key: &str) -> Option<&Value> {
        self.positional(index).or_else(|| self.named(key))
    }

    /// String argument by position or name
    pub fn get_str(&self, index: usize, key: &str) -> Option<&str> {
        self.get(index, key).and_then(Value::as_str)
    }

    /// Render as shell words (strings verbatim, other values as JSON).
    /// Named arguments cannot be rendered and yield `None`.
    pub fn to_words(&self) -> Option<Vec<String>> {
        match self {
            Args::None => Some(Vec::new()),
            Args::Positional(items) => Some(items.iter().map(render_word).collect()),
            Args::Single(value) => Some(vec![render_word(value)]),
            Args::Named(_) => None,
        }
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Args::None => write!(f, "None"),
            Args::Single(value) => write!(f, "{}", render_word(value)),
            Args::Positional(items) => write!(f, "{}", Value::Array(items.clone())),
            Args::Named(map) => {
                let object: serde_json::Map<String, Value> =
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                write!(f, "{}", Value::Object(object))
            }
        }
    }
}

fn value_has_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains(PLACEHOLDER),
        Value::Array(items) => items.iter().any(value_has_placeholder),
        Value::Object(map) => map.values().any(value_has_placeholder),
        _ => false,
    }
}

fn substitute_value(value: &Value, file: &str) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace(PLACEHOLDER, file)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, file)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, file)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_word(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_shapes() {
        assert_eq!(Args::from_value(Value::Null), Args::None);
        assert!(matches!(Args::from_value(json!(["a", 1])), Args::Positional(v) if v.len() == 2));
        assert!(matches!(Args::from_value(json!({"path": "x"})), Args::Named(_)));
        assert_eq!(Args::from_value(json!("x")), Args::Single(json!("x")));
    }

    #[test]
    fn test_placeholder_detected_at_depth() {
        let args = Args::from_value(json!(["plain", ["nested", {"k": "in/<StepFile>"}]]));
        assert!(args.contains_placeholder());
    }

    #[test]
    fn test_placeholder_in_key_is_ignored() {
        let args = Args::from_value(json!({"<StepFile>": "value"}));
        assert!(!args.contains_placeholder());
    }

    #[test]
    fn test_substitute_replaces_every_occurrence() {
        let args = Args::from_value(json!({
            "input": "<StepFile>",
            "output": ["<StepFile>.out", 3]
        }));
        let substituted = args.substitute("/data/a.txt");
        assert!(!substituted.contains_placeholder());
        assert_eq!(substituted.named("input"), Some(&json!("/data/a.txt")));
        assert_eq!(substituted.named("output"), Some(&json!(["/data/a.txt.out", 3])));
    }

    #[test]
    fn test_append() {
        assert_eq!(Args::None.append("f"), Some(Args::strings(["f"])));
        assert_eq!(Args::strings(["-l"]).append("f"), Some(Args::strings(["-l", "f"])));
        assert_eq!(
            Args::Single(json!("x")).append("f"),
            Some(Args::strings(["x", "f"]))
        );
        assert_eq!(Args::from_value(json!({"a": 1})).append("f"), None);
    }

    #[test]
    fn test_get_by_position_or_name() {
        let positional = Args::strings(["foo", "bar"]);
        let named = Args::from_value(json!({"filename": "foo", "string": "bar"}));
        assert_eq!(positional.get_str(1, "string"), Some("bar"));
        assert_eq!(named.get_str(1, "string"), Some("bar"));
        assert_eq!(Args::Single(json!("only")).get_str(0, "filename"), Some("only"));
    }

    #[test]
    fn test_words() {
        assert_eq!(
            Args::from_value(json!(["-n", 3])).to_words(),
            Some(vec!["-n".to_string(), "3".to_string()])
        );
        assert_eq!(Args::from_value(json!({"a": 1})).to_words(), None);
    }
}
