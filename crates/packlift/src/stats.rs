//! Build statistics and the stopwatch combinator.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

/// Statistics record key for the overall build.
pub const STAT_BUILD: &str = "build";

/// Statistics record key for archive emission.
pub const STAT_TO_ZIP: &str = "toZip";

/// Timing (and, for archive emission, size) of one tracked operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpStats {
    /// Elapsed wall time in milliseconds. Recorded only when the operation
    /// succeeds; a failed operation leaves the slot empty.
    pub time_ms: Option<u64>,

    /// Emitted archive size in bytes (archive emission only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Mapping from tracked operation name to its [`OpStats`].
///
/// Keys are `"build"`, each step's declared output path and `"toZip"`.
pub type BuildStats = BTreeMap<String, OpStats>;

/// Shared, concurrently updated statistics record.
///
/// Every step task and the archive emitter write into the same record;
/// readers take point-in-time snapshots, which may be incomplete before
/// the build is ready.
#[derive(Debug, Clone, Default)]
pub struct SharedStats {
    inner: Arc<Mutex<BuildStats>>,
}

impl SharedStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current statistics.
    pub fn snapshot(&self) -> BuildStats {
        self.inner.lock().expect("stats lock poisoned").clone()
    }

    /// Create the named slot if it does not exist yet.
    pub(crate) fn attach(&self, name: &str) {
        let mut stats = self.inner.lock().expect("stats lock poisoned");
        stats.entry(name.to_string()).or_default();
    }

    pub(crate) fn record_time(&self, name: &str, elapsed_ms: u64) {
        let mut stats = self.inner.lock().expect("stats lock poisoned");
        stats.entry(name.to_string()).or_default().time_ms = Some(elapsed_ms);
    }

    pub(crate) fn record_size(&self, name: &str, size: u64) {
        let mut stats = self.inner.lock().expect("stats lock poisoned");
        stats.entry(name.to_string()).or_default().size = Some(size);
    }
}

/// Run `fut` and record its elapsed time under `name` if it succeeds.
///
/// The named slot is created when tracking attaches, before the operation
/// runs. The future's output is returned unchanged; failures record no
/// timing.
pub(crate) async fn track<T, E, F>(stats: &SharedStats, name: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    stats.attach(name);
    let start = Instant::now();
    let result = fut.await;
    if result.is_ok() {
        stats.record_time(name, start.elapsed().as_millis() as u64);
    }
    result
}
