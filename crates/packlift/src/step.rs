//! Build step declarations and the recipe contract.
//!
//! A [`BuildRecipe`] declares an ordered list of named steps; each step's
//! name is its output path in the built tree. The step's kind is decided
//! once at declaration time:
//!
//! - [`StepKind::CopyRef`] copies one input file verbatim
//! - [`StepKind::Sync`] runs a synchronous body
//! - [`StepKind::Async`] runs an asynchronous body
//!
//! Step bodies read the input tree and runtime variables through the
//! [`StepContext`] they are handed.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::tree::{FileData, FileTree, StepOutput};

/// Caller-supplied runtime variables, available to every step.
pub type RuntimeVars = BTreeMap<String, Value>;

/// Read-only view handed to every step body: the input tree and the
/// build's runtime variables.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The immutable input tree for this build.
    pub files: Arc<FileTree>,
    /// Runtime variables supplied at build time.
    pub runtime: Arc<RuntimeVars>,
}

impl StepContext {
    /// Look up an input file.
    pub fn file(&self, path: &str) -> Option<&FileData> {
        self.files.get(path)
    }

    /// Look up an input file, failing if it is absent.
    pub fn require(&self, path: &str) -> anyhow::Result<&FileData> {
        self.files
            .get(path)
            .ok_or_else(|| anyhow::anyhow!("missing input file `{path}`"))
    }

    /// Look up an input file as UTF-8 text.
    pub fn text(&self, path: &str) -> anyhow::Result<&str> {
        self.require(path)?
            .as_text()
            .ok_or_else(|| anyhow::anyhow!("input file `{path}` is not valid UTF-8"))
    }

    /// Look up a runtime variable.
    pub fn var(&self, key: &str) -> Option<&Value> {
        self.runtime.get(key)
    }
}

/// Synchronous step body.
pub type SyncStepFn = Box<dyn Fn(&StepContext) -> anyhow::Result<StepOutput> + Send + Sync>;

/// Asynchronous step body.
pub type AsyncStepFn =
    Box<dyn Fn(StepContext) -> BoxFuture<'static, anyhow::Result<StepOutput>> + Send + Sync>;

/// How a declared step produces its output.
pub enum StepKind {
    /// Copy the named input file verbatim to the step's output path.
    CopyRef(String),
    /// Run a synchronous body and merge its return value.
    Sync(SyncStepFn),
    /// Run an asynchronous body and merge its resolved value.
    Async(AsyncStepFn),
}

impl StepKind {
    /// Short kind name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::CopyRef(_) => "copy",
            StepKind::Sync(_) => "sync",
            StepKind::Async(_) => "async",
        }
    }
}

impl std::fmt::Debug for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::CopyRef(path) => f.debug_tuple("CopyRef").field(path).finish(),
            StepKind::Sync(_) => f.write_str("Sync(..)"),
            StepKind::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// One declared build step: an output path and a body.
#[derive(Debug)]
pub struct Step {
    /// Output path of this step, relative to the built tree root.
    pub name: String,
    /// The step's body.
    pub kind: StepKind,
}

impl Step {
    /// Declare a step that copies `source_path` from the input tree.
    pub fn copy(name: impl Into<String>, source_path: impl Into<String>) -> Self {
        Step {
            name: name.into(),
            kind: StepKind::CopyRef(source_path.into()),
        }
    }

    /// Declare a step with a synchronous body.
    pub fn sync<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&StepContext) -> anyhow::Result<StepOutput> + Send + Sync + 'static,
    {
        Step {
            name: name.into(),
            kind: StepKind::Sync(Box::new(body)),
        }
    }

    /// Declare a step with an asynchronous body.
    pub fn asynchronous<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<StepOutput>> + Send + 'static,
    {
        Step {
            name: name.into(),
            kind: StepKind::Async(Box::new(move |ctx| Box::pin(body(ctx)))),
        }
    }
}

/// A set of build steps, instantiated once per build.
///
/// `steps()` is invoked exactly once by
/// [`Packager::build`](crate::packager::Packager::build) and must return a
/// fresh step list; an `Err` surfaces as
/// [`PackError::Instantiation`](crate::error::PackError::Instantiation).
/// `id()` must be stable across processes for the same recipe: it seeds the
/// cache fingerprint together with the declared step names and the runtime
/// variables.
pub trait BuildRecipe: Send + Sync {
    /// Stable recipe identity, mixed into the cache fingerprint.
    fn id(&self) -> &str;

    /// Produce this build's step list, in declaration order.
    fn steps(&self) -> anyhow::Result<Vec<Step>>;
}
