//! Error types for the packaging engine.

use thiserror::Error;

/// Errors produced while orchestrating a build or emitting an archive.
///
/// Variants carry `String` payloads so the whole enum stays `Clone`; the
/// readiness channel broadcasts the first failure to every waiter.
#[derive(Error, Debug, Clone)]
pub enum PackError {
    /// The recipe could not produce its step list.
    #[error("could not instantiate build recipe: {0}")]
    Instantiation(String),

    /// A declared step violates the recipe contract (empty or duplicate name).
    #[error("invalid step `{step}`: {reason}")]
    InvalidStep { step: String, reason: String },

    /// A copy step referenced an input path that does not exist.
    #[error("unknown source path `{source_path}` referenced by step `{step}`")]
    UnknownSourcePath { step: String, source_path: String },

    /// A step produced a value the merger cannot place in the output tree.
    #[error("invalid output type `{kind}` for `{path}` (string, bytes or nested tree expected)")]
    InvalidOutputType { path: String, kind: &'static str },

    /// A step body returned an error or panicked.
    #[error("step `{step}` failed: {message}")]
    StepFailed { step: String, message: String },

    /// Archive codec error during ZIP emission.
    #[error("archive error: {0}")]
    Archive(String),

    /// I/O error while opening or writing the archive target.
    #[error("i/o error: {0}")]
    Io(String),

    /// Invariant violation inside the orchestrator itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for PackError {
    fn from(err: std::io::Error) -> Self {
        PackError::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for PackError {
    fn from(err: zip::result::ZipError) -> Self {
        PackError::Archive(err.to_string())
    }
}

/// Errors surfaced by a [`BuildCache`](crate::cache::BuildCache) backend.
///
/// The orchestrator never fails a build over these: a `get` error degrades
/// to a cache miss and a `set` error is logged and dropped.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend storage failure.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// Cached entry could not be (de)serialized.
    #[error("cache serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
