//! The build orchestrator.
//!
//! [`Packager::build`] instantiates a recipe, fans out one task per declared
//! step, merges every result into a single output tree and exposes a one-shot
//! readiness signal. An optional fingerprint-keyed cache can bypass step
//! execution entirely.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{BuildCache, CacheEntry, Fingerprint};
use crate::error::PackError;
use crate::runner::run_step;
use crate::stats::{BuildStats, SharedStats, STAT_BUILD};
use crate::step::{BuildRecipe, RuntimeVars, Step, StepContext};
use crate::tree::FileTree;
use crate::archive::{emit, ZipOptions, ZipTarget};

/// Options accepted by [`Packager::build`].
#[derive(Clone, Default)]
pub struct BuildOptions {
    /// Result cache consulted before running any step. A hit adopts the
    /// cached output tree; a miss populates the cache after a successful
    /// build.
    pub cache: Option<Arc<dyn BuildCache>>,
}

impl BuildOptions {
    /// Options with a result cache attached.
    pub fn with_cache(cache: Arc<dyn BuildCache>) -> Self {
        BuildOptions { cache: Some(cache) }
    }
}

impl std::fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOptions")
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// Resolution state of the readiness signal.
#[derive(Debug, Clone, Default)]
enum ReadyState {
    #[default]
    Pending,
    Ready,
    Failed(PackError),
}

/// One in-flight (or finished) build.
///
/// The output tree and statistics are shared with still-running step tasks:
/// after a failure has been reported, detached siblings may keep merging
/// their results, so pre-readiness snapshots are not frozen.
#[derive(Debug)]
pub struct Packager {
    build_id: Uuid,
    built: Arc<Mutex<FileTree>>,
    stats: SharedStats,
    ready: watch::Receiver<ReadyState>,
}

impl Packager {
    /// Start a build.
    ///
    /// Fails synchronously on recipe instantiation errors and invalid step
    /// declarations; those never enter the readiness signal. Everything
    /// else happens on a supervisor task, so this must be called from
    /// within a Tokio runtime.
    pub fn build(
        files: FileTree,
        recipe: &dyn BuildRecipe,
        runtime: RuntimeVars,
        options: BuildOptions,
    ) -> Result<Packager, PackError> {
        let steps = recipe
            .steps()
            .map_err(|err| PackError::Instantiation(format!("{err:#}")))?;
        validate_steps(&steps)?;

        let build_id = Uuid::new_v4();
        let step_names: Vec<String> = steps.iter().map(|s| s.name.clone()).collect();
        let fingerprint = options
            .cache
            .as_ref()
            .map(|_| Fingerprint::compute(recipe.id(), &step_names, &runtime));

        let ctx = StepContext {
            files: Arc::new(files),
            runtime: Arc::new(runtime),
        };
        let built = Arc::new(Mutex::new(FileTree::new()));
        let stats = SharedStats::new();
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Pending);

        // The overall build is timed from construction to readiness.
        stats.attach(STAT_BUILD);
        let started = Instant::now();

        info!(
            build_id = %build_id,
            recipe = recipe.id(),
            steps = steps.len(),
            "starting build"
        );

        tokio::spawn(supervise(
            build_id,
            steps,
            ctx,
            built.clone(),
            stats.clone(),
            options.cache,
            fingerprint,
            ready_tx,
            started,
        ));

        Ok(Packager {
            build_id,
            built,
            stats,
            ready: ready_rx,
        })
    }

    /// Identifier correlating this build's log lines.
    pub fn build_id(&self) -> Uuid {
        self.build_id
    }

    /// Wait until the output tree is final.
    ///
    /// Resolves with `Ok` on a cache hit or once every step has succeeded;
    /// fails with the first step failure. Safe to call from any number of
    /// waiters, any number of times.
    pub async fn ready(&self) -> Result<(), PackError> {
        let mut ready = self.ready.clone();
        loop {
            match &*ready.borrow_and_update() {
                ReadyState::Ready => return Ok(()),
                ReadyState::Failed(err) => return Err(err.clone()),
                ReadyState::Pending => {}
            }
            if ready.changed().await.is_err() {
                return Err(PackError::Internal(
                    "build task stopped before signalling readiness".to_string(),
                ));
            }
        }
    }

    /// Wait for readiness and return the final output tree.
    pub async fn to_json(&self) -> Result<FileTree, PackError> {
        self.ready().await?;
        Ok(self.built.lock().expect("output tree lock poisoned").clone())
    }

    /// Wait for readiness and emit the output tree as a ZIP archive.
    pub async fn to_zip(
        &self,
        target: impl Into<ZipTarget>,
        options: ZipOptions,
    ) -> Result<(), PackError> {
        self.ready().await?;
        let files = self.built.lock().expect("output tree lock poisoned").clone();
        emit(files, target.into(), options, self.stats.clone()).await
    }

    /// Snapshot the output tree, possibly before readiness.
    pub fn built_files(&self) -> FileTree {
        self.built.lock().expect("output tree lock poisoned").clone()
    }

    /// Snapshot the statistics record, possibly incomplete before readiness.
    pub fn stats(&self) -> BuildStats {
        self.stats.snapshot()
    }
}

fn validate_steps(steps: &[Step]) -> Result<(), PackError> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.name.is_empty() {
            return Err(PackError::InvalidStep {
                step: step.name.clone(),
                reason: "step name must not be empty".to_string(),
            });
        }
        if !seen.insert(step.name.as_str()) {
            return Err(PackError::InvalidStep {
                step: step.name.clone(),
                reason: "duplicate step name".to_string(),
            });
        }
    }
    Ok(())
}

/// Supervisor: cache lookup, fan-out, fan-in, readiness resolution.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    build_id: Uuid,
    steps: Vec<Step>,
    ctx: StepContext,
    built: Arc<Mutex<FileTree>>,
    stats: SharedStats,
    cache: Option<Arc<dyn BuildCache>>,
    fingerprint: Option<Fingerprint>,
    ready_tx: watch::Sender<ReadyState>,
    started: Instant,
) {
    if let (Some(cache), Some(key)) = (&cache, &fingerprint) {
        match cache.get(key).await {
            Ok(Some(entry)) => {
                info!(
                    build_id = %build_id,
                    fingerprint = key.short(),
                    "cache hit, skipping step execution"
                );
                *built.lock().expect("output tree lock poisoned") = entry.built_files;
                stats.record_time(STAT_BUILD, started.elapsed().as_millis() as u64);
                let _ = ready_tx.send(ReadyState::Ready);
                return;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(build_id = %build_id, error = %err, "cache lookup failed, treating as miss");
            }
        }
    }

    // Fan out one task per step, all initiated together. Join handles are
    // wrapped so a panicking body surfaces as that step's failure with its
    // name attached.
    let mut pending: FuturesUnordered<_> = steps
        .into_iter()
        .map(|step| {
            let name = step.name.clone();
            let handle = tokio::spawn(run_step(step, ctx.clone(), built.clone(), stats.clone()));
            async move {
                match handle.await {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => Err(PackError::StepFailed {
                        step: name,
                        message: "step body panicked".to_string(),
                    }),
                    Err(err) => Err(PackError::StepFailed {
                        step: name,
                        message: err.to_string(),
                    }),
                }
            }
        })
        .collect();

    // Fan in, in completion order. The first failure resolves the readiness
    // signal; siblings are not cancelled and may still merge their results,
    // so keep draining to observe (and log) their outcomes.
    let mut failed = false;
    while let Some(result) = pending.next().await {
        match result {
            Ok(()) => {}
            Err(err) if !failed => {
                failed = true;
                warn!(build_id = %build_id, error = %err, "build failed");
                let _ = ready_tx.send(ReadyState::Failed(err));
            }
            Err(err) => {
                // First failure wins; later concurrent failures are only logged.
                warn!(build_id = %build_id, error = %err, "step failed after build already failed");
            }
        }
    }
    if failed {
        return;
    }

    stats.record_time(STAT_BUILD, started.elapsed().as_millis() as u64);
    info!(build_id = %build_id, "build finished");
    let _ = ready_tx.send(ReadyState::Ready);

    // Cache population happens once, after readiness resolves.
    if let (Some(cache), Some(key)) = (cache, fingerprint) {
        let entry = CacheEntry {
            built_files: built.lock().expect("output tree lock poisoned").clone(),
        };
        if let Err(err) = cache.set(&key, entry).await {
            warn!(build_id = %build_id, error = %err, "cache store failed");
        }
    }
}
