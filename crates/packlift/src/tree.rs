//! File trees and the path-tree merger.
//!
//! A build consumes an immutable input [`FileTree`] and produces an output
//! `FileTree` incrementally, one step at a time. Each step hands the merger
//! a [`StepOutput`]: a single scalar, a nested tree that expands into
//! `/`-joined paths, a JSON value, or nothing at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PackError;

/// Content of one tree entry: UTF-8 text or opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileData {
    /// UTF-8 text content.
    Text(String),
    /// Raw binary content.
    Binary(Vec<u8>),
}

impl FileData {
    /// View the content as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileData::Text(s) => s.as_bytes(),
            FileData::Binary(b) => b,
        }
    }

    /// View the content as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileData::Text(s) => Some(s),
            FileData::Binary(b) => std::str::from_utf8(b).ok(),
        }
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the content is empty.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<&str> for FileData {
    fn from(s: &str) -> Self {
        FileData::Text(s.to_string())
    }
}

impl From<String> for FileData {
    fn from(s: String) -> Self {
        FileData::Text(s)
    }
}

impl From<Vec<u8>> for FileData {
    fn from(b: Vec<u8>) -> Self {
        FileData::Binary(b)
    }
}

impl From<&[u8]> for FileData {
    fn from(b: &[u8]) -> Self {
        FileData::Binary(b.to_vec())
    }
}

/// A path-addressed tree of file contents.
///
/// Keys are relative paths with `/` separators and no leading slash.
pub type FileTree = BTreeMap<String, FileData>;

/// What a single build step produced.
#[derive(Debug)]
pub enum StepOutput {
    /// A single file at the step's declared path.
    Data(FileData),
    /// A nested mapping expanded into `step/<sub>/<path>` entries.
    Tree(BTreeMap<String, StepOutput>),
    /// A dynamic JSON value: strings become text leaves, objects recurse,
    /// null produces nothing. Anything else is an [`PackError::InvalidOutputType`].
    Value(Value),
    /// Explicit "no output": the step's key is omitted from the output tree.
    None,
}

impl From<FileData> for StepOutput {
    fn from(data: FileData) -> Self {
        StepOutput::Data(data)
    }
}

impl From<&str> for StepOutput {
    fn from(s: &str) -> Self {
        StepOutput::Data(s.into())
    }
}

impl From<String> for StepOutput {
    fn from(s: String) -> Self {
        StepOutput::Data(s.into())
    }
}

impl From<Vec<u8>> for StepOutput {
    fn from(b: Vec<u8>) -> Self {
        StepOutput::Data(b.into())
    }
}

impl From<Value> for StepOutput {
    fn from(v: Value) -> Self {
        StepOutput::Value(v)
    }
}

/// Merge one step's output into the output tree at `base_path`.
///
/// Nested trees expand arbitrarily deep; sub-paths are joined with `/`
/// regardless of the platform's native separator. Existing entries are
/// overwritten. Fails synchronously with [`PackError::InvalidOutputType`]
/// when a JSON leaf is neither a string, an object nor null.
pub(crate) fn merge(out: &mut FileTree, base_path: &str, output: StepOutput) -> Result<(), PackError> {
    match output {
        StepOutput::Data(data) => {
            out.insert(base_path.to_string(), data);
            Ok(())
        }
        StepOutput::None => Ok(()),
        StepOutput::Tree(entries) => {
            for (sub_path, sub_output) in entries {
                merge(out, &join_path(base_path, &sub_path), sub_output)?;
            }
            Ok(())
        }
        StepOutput::Value(value) => merge_value(out, base_path, value),
    }
}

fn merge_value(out: &mut FileTree, base_path: &str, value: Value) -> Result<(), PackError> {
    match value {
        Value::String(s) => {
            out.insert(base_path.to_string(), FileData::Text(s));
            Ok(())
        }
        Value::Null => Ok(()),
        Value::Object(entries) => {
            for (sub_path, sub_value) in entries {
                merge_value(out, &join_path(base_path, &sub_path), sub_value)?;
            }
            Ok(())
        }
        other => Err(PackError::InvalidOutputType {
            path: base_path.to_string(),
            kind: json_kind(&other),
        }),
    }
}

/// Join an output path and a sub-path with `/`, normalizing `\` separators
/// and trimming redundant slashes.
pub(crate) fn join_path(base: &str, sub: &str) -> String {
    let sub = sub.replace('\\', "/");
    let sub = sub.trim_matches('/');
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        sub.to_string()
    } else if sub.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, sub)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
