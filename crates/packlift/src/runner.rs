//! Dispatch of a single declared build step.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::PackError;
use crate::stats::{track, SharedStats};
use crate::step::{Step, StepContext, StepKind};
use crate::tree::{merge, FileTree, StepOutput};

/// Run one step to completion and merge its output into the shared tree.
///
/// The whole dispatch (body plus merge) is stopwatch-tracked under the
/// step's declared path. Body errors and merge errors both become the
/// step's failure; neither escapes into the orchestrator as a panic.
/// Each step writes only under its own declared name, so concurrent
/// merges never touch the same top-level key group.
pub(crate) async fn run_step(
    step: Step,
    ctx: StepContext,
    built: Arc<Mutex<FileTree>>,
    stats: SharedStats,
) -> Result<(), PackError> {
    let name = step.name;
    let kind = step.kind;
    let kind_name = kind.name();

    track(&stats, &name, async {
        let output = produce(&name, kind, &ctx).await?;

        {
            let mut tree = built.lock().expect("output tree lock poisoned");
            merge(&mut tree, &name, output)?;
        }

        debug!(step = %name, kind = kind_name, "step finished");
        Ok(())
    })
    .await
}

/// Invoke the step body and normalize its outcome.
async fn produce(name: &str, kind: StepKind, ctx: &StepContext) -> Result<StepOutput, PackError> {
    match kind {
        StepKind::CopyRef(source_path) => ctx
            .file(&source_path)
            .cloned()
            .map(StepOutput::Data)
            .ok_or_else(|| PackError::UnknownSourcePath {
                step: name.to_string(),
                source_path,
            }),
        StepKind::Sync(body) => body(ctx).map_err(|err| PackError::StepFailed {
            step: name.to_string(),
            message: format!("{err:#}"),
        }),
        StepKind::Async(body) => body(ctx.clone()).await.map_err(|err| PackError::StepFailed {
            step: name.to_string(),
            message: format!("{err:#}"),
        }),
    }
}
