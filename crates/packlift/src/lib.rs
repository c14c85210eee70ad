//! Packlift - concurrent build-step packaging engine
//!
//! Builds a named set of output artifacts from an in-memory source tree:
//! - Runs a caller-declared set of build steps concurrently
//! - Collects each step's result (scalar or nested sub-tree) into one
//!   path-addressed output tree
//! - Optionally short-circuits whole builds through a fingerprint-keyed
//!   result cache
//! - Records per-step and aggregate timing statistics
//! - Optionally serializes the output tree as a ZIP archive
//!
//! The engine is compiler- and bundler-agnostic: what each step produces is
//! entirely up to the caller's [`BuildRecipe`].
//!
//! ```no_run
//! use packlift::{BuildOptions, BuildRecipe, Packager, RuntimeVars, Step};
//! use packlift::tree::FileTree;
//!
//! struct Dist;
//!
//! impl BuildRecipe for Dist {
//!     fn id(&self) -> &str {
//!         "dist"
//!     }
//!
//!     fn steps(&self) -> anyhow::Result<Vec<Step>> {
//!         Ok(vec![
//!             Step::copy("LICENSE", "LICENSE.txt"),
//!             Step::sync("dist/main.js", |ctx| {
//!                 Ok(ctx.text("src/main.js")?.to_string().into())
//!             }),
//!         ])
//!     }
//! }
//!
//! # async fn run(files: FileTree) -> Result<(), packlift::PackError> {
//! let pkg = Packager::build(files, &Dist, RuntimeVars::new(), BuildOptions::default())?;
//! let built = pkg.to_json().await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cache;
pub mod error;
pub mod packager;
mod runner;
pub mod stats;
pub mod step;
pub mod tree;

// Re-export key types
pub use archive::{ZipOptions, ZipTarget};
pub use cache::{BuildCache, CacheEntry, CacheResult, Fingerprint, MemoryBuildCache};
pub use error::{CacheError, PackError};
pub use packager::{BuildOptions, Packager};
pub use stats::{BuildStats, OpStats, STAT_BUILD, STAT_TO_ZIP};
pub use step::{BuildRecipe, RuntimeVars, Step, StepContext, StepKind};
pub use tree::{FileData, FileTree, StepOutput};
