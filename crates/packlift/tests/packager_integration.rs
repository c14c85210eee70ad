//! Integration tests for the packager with the in-memory build cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use packlift::tree::FileTree;
use packlift::{
    BuildOptions, BuildRecipe, MemoryBuildCache, PackError, Packager, RuntimeVars, Step,
    StepContext, StepOutput, ZipOptions, ZipTarget, STAT_BUILD, STAT_TO_ZIP,
};
use serde_json::json;

fn fixture_files() -> FileTree {
    let mut files = FileTree::new();
    files.insert("foo".to_string(), "foo\n".into());
    files.insert("bar".to_string(), "bar\n".into());
    files
}

struct CopyRecipe;

impl BuildRecipe for CopyRecipe {
    fn id(&self) -> &str {
        "copy"
    }

    fn steps(&self) -> anyhow::Result<Vec<Step>> {
        Ok(vec![Step::copy("output", "foo")])
    }
}

struct ConcatRecipe;

impl BuildRecipe for ConcatRecipe {
    fn id(&self) -> &str {
        "concat"
    }

    fn steps(&self) -> anyhow::Result<Vec<Step>> {
        Ok(vec![Step::sync("out", |ctx| {
            Ok(format!("{}{}", ctx.text("foo")?, ctx.text("bar")?).into())
        })])
    }
}

/// Test: a string-valued step is a verbatim copy of the named input entry.
#[tokio::test]
async fn test_copy_step_shallow_copies_input() {
    let pkg = Packager::build(
        fixture_files(),
        &CopyRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .expect("build failed to start");

    let built = pkg.to_json().await.expect("build failed");
    assert_eq!(built["output"].as_bytes(), b"foo\n".as_slice());
    assert_eq!(built.len(), 1);
}

/// Test: a sync step's returned text lands unmodified at its declared path.
#[tokio::test]
async fn test_sync_concat_step() {
    let pkg = Packager::build(
        fixture_files(),
        &ConcatRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .expect("build failed to start");

    let built = pkg.to_json().await.expect("build failed");
    assert_eq!(built["out"].as_text(), Some("foo\nbar\n"));
}

/// Test: nested results expand into `/`-joined paths; null leaves vanish.
#[tokio::test]
async fn test_nested_output_expands_into_subpaths() {
    struct NestedRecipe;
    impl BuildRecipe for NestedRecipe {
        fn id(&self) -> &str {
            "nested"
        }
        fn steps(&self) -> anyhow::Result<Vec<Step>> {
            Ok(vec![Step::sync("output", |_| {
                Ok(json!({"baz": "baz", "qux/quux": "quux", "skipped": null}).into())
            })])
        }
    }

    let pkg = Packager::build(
        fixture_files(),
        &NestedRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .unwrap();

    let built = pkg.to_json().await.unwrap();
    assert_eq!(built["output/baz"].as_text(), Some("baz"));
    assert_eq!(built["output/qux/quux"].as_text(), Some("quux"));
    assert!(!built.contains_key("output/skipped"));
    assert_eq!(built.len(), 2);
}

/// Test: a step declaring "no output" never appears in the output tree.
#[tokio::test]
async fn test_none_output_is_omitted() {
    struct NoneRecipe;
    impl BuildRecipe for NoneRecipe {
        fn id(&self) -> &str {
            "none"
        }
        fn steps(&self) -> anyhow::Result<Vec<Step>> {
            Ok(vec![Step::sync("output", |_| Ok(StepOutput::None))])
        }
    }

    let pkg = Packager::build(
        fixture_files(),
        &NoneRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .unwrap();

    let built = pkg.to_json().await.unwrap();
    assert!(built.is_empty());
}

/// Test: an async step reads the context and resolves with its data.
#[tokio::test]
async fn test_async_step() {
    struct AsyncRecipe;
    impl BuildRecipe for AsyncRecipe {
        fn id(&self) -> &str {
            "async"
        }
        fn steps(&self) -> anyhow::Result<Vec<Step>> {
            Ok(vec![Step::asynchronous("out", |ctx: StepContext| async move {
                tokio::task::yield_now().await;
                Ok(ctx.text("bar")?.to_string().into())
            })])
        }
    }

    let pkg = Packager::build(
        fixture_files(),
        &AsyncRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .unwrap();

    let built = pkg.to_json().await.unwrap();
    assert_eq!(built["out"].as_text(), Some("bar\n"));
}

/// Test: a copy step referencing a missing input fails the build.
#[tokio::test]
async fn test_unknown_source_path_fails_build() {
    struct BadCopyRecipe;
    impl BuildRecipe for BadCopyRecipe {
        fn id(&self) -> &str {
            "bad-copy"
        }
        fn steps(&self) -> anyhow::Result<Vec<Step>> {
            Ok(vec![Step::copy("out", "does-not-exist")])
        }
    }

    let pkg = Packager::build(
        fixture_files(),
        &BadCopyRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .unwrap();

    let err = pkg.to_json().await.unwrap_err();
    assert!(matches!(err, PackError::UnknownSourcePath { .. }));
}

/// Test: one failing step fails the build, but completed siblings' entries
/// remain visible in the output-tree snapshot (no cancellation).
#[tokio::test(start_paused = true)]
async fn test_step_failure_does_not_discard_completed_siblings() {
    struct MixedRecipe;
    impl BuildRecipe for MixedRecipe {
        fn id(&self) -> &str {
            "mixed"
        }
        fn steps(&self) -> anyhow::Result<Vec<Step>> {
            Ok(vec![
                Step::sync("ok", |_| Ok("fine".into())),
                Step::asynchronous("broken", |_ctx| async {
                    // Fail only after the sibling has had time to finish.
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    anyhow::bail!("late failure")
                }),
            ])
        }
    }

    let pkg = Packager::build(
        fixture_files(),
        &MixedRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .unwrap();

    let err = pkg.to_json().await.unwrap_err();
    match err {
        PackError::StepFailed { step, message } => {
            assert_eq!(step, "broken");
            assert!(message.contains("late failure"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let snapshot = pkg.built_files();
    assert_eq!(snapshot["ok"].as_text(), Some("fine"));
    assert!(!snapshot.contains_key("broken"));
}

/// Test: a panicking step body becomes that step's failure and does not
/// take the orchestrator down.
#[tokio::test]
async fn test_panicking_step_is_contained() {
    struct PanicRecipe;
    impl BuildRecipe for PanicRecipe {
        fn id(&self) -> &str {
            "panic"
        }
        fn steps(&self) -> anyhow::Result<Vec<Step>> {
            Ok(vec![Step::sync("boom", |_| panic!("step blew up"))])
        }
    }

    let pkg = Packager::build(
        fixture_files(),
        &PanicRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .unwrap();

    let err = pkg.to_json().await.unwrap_err();
    assert!(matches!(err, PackError::StepFailed { .. }));
}

struct CountingRecipe {
    runs: Arc<AtomicUsize>,
}

impl BuildRecipe for CountingRecipe {
    fn id(&self) -> &str {
        "counting"
    }

    fn steps(&self) -> anyhow::Result<Vec<Step>> {
        let runs = self.runs.clone();
        Ok(vec![Step::sync("out", move |ctx| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(ctx.text("foo")?.to_string().into())
        })])
    }
}

/// Test: a second identical build with the same cache reuses the first
/// output tree and never invokes a step body.
#[tokio::test]
async fn test_cache_hit_skips_step_execution() {
    let cache = Arc::new(MemoryBuildCache::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let recipe = CountingRecipe { runs: runs.clone() };

    let first = Packager::build(
        fixture_files(),
        &recipe,
        RuntimeVars::new(),
        BuildOptions::with_cache(cache.clone()),
    )
    .unwrap();
    let first_tree = first.to_json().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Cache population happens after readiness; wait for it to land.
    for _ in 0..50 {
        if !cache.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(cache.len(), 1);

    let second = Packager::build(
        fixture_files(),
        &recipe,
        RuntimeVars::new(),
        BuildOptions::with_cache(cache.clone()),
    )
    .unwrap();
    let second_tree = second.to_json().await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1, "cached build must not run steps");
    assert_eq!(first_tree, second_tree);
    assert!(second.stats()[STAT_BUILD].time_ms.is_some());
}

/// Test: changed runtime variables miss the cache and re-run the steps.
#[tokio::test]
async fn test_changed_runtime_vars_miss_cache() {
    let cache = Arc::new(MemoryBuildCache::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let recipe = CountingRecipe { runs: runs.clone() };

    let first = Packager::build(
        fixture_files(),
        &recipe,
        RuntimeVars::new(),
        BuildOptions::with_cache(cache.clone()),
    )
    .unwrap();
    first.to_json().await.unwrap();

    let mut vars = RuntimeVars::new();
    vars.insert("debug".to_string(), json!(true));
    let second = Packager::build(
        fixture_files(),
        &recipe,
        vars,
        BuildOptions::with_cache(cache.clone()),
    )
    .unwrap();
    second.to_json().await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Test: statistics carry the overall build time and one slot per step.
#[tokio::test]
async fn test_stats_record_build_and_step_times() {
    struct TwoStepRecipe;
    impl BuildRecipe for TwoStepRecipe {
        fn id(&self) -> &str {
            "two-step"
        }
        fn steps(&self) -> anyhow::Result<Vec<Step>> {
            Ok(vec![
                Step::copy("a", "foo"),
                Step::sync("b/nested", |_| Ok("data".into())),
            ])
        }
    }

    let pkg = Packager::build(
        fixture_files(),
        &TwoStepRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .unwrap();
    pkg.ready().await.unwrap();

    let stats = pkg.stats();
    assert!(stats[STAT_BUILD].time_ms.is_some());
    assert!(stats["a"].time_ms.is_some());
    assert!(stats["b/nested"].time_ms.is_some());
}

/// Test: to_zip with a basedir emits prefixed members and records the size.
#[tokio::test]
async fn test_to_zip_with_basedir() {
    struct PairRecipe;
    impl BuildRecipe for PairRecipe {
        fn id(&self) -> &str {
            "pair"
        }
        fn steps(&self) -> anyhow::Result<Vec<Step>> {
            Ok(vec![
                Step::sync("a", |_| Ok("x".into())),
                Step::sync("b", |_| Ok("y".into())),
            ])
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("bundle.zip");

    let pkg = Packager::build(
        fixture_files(),
        &PairRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .unwrap();

    pkg.to_zip(ZipTarget::from(archive_path.as_path()), ZipOptions::basedir("pkg"))
        .await
        .expect("zip emission failed");

    let file = std::fs::File::open(&archive_path).unwrap();
    let archive = zip::ZipArchive::new(file).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"pkg/a"));
    assert!(names.contains(&"pkg/b"));

    let stats = pkg.stats();
    assert!(stats[STAT_TO_ZIP].time_ms.is_some());
    assert!(stats[STAT_TO_ZIP].size.unwrap() > 0);
}

/// Test: binary step results survive the build byte for byte.
#[tokio::test]
async fn test_binary_output_roundtrip() {
    struct BinaryRecipe;
    impl BuildRecipe for BinaryRecipe {
        fn id(&self) -> &str {
            "binary"
        }
        fn steps(&self) -> anyhow::Result<Vec<Step>> {
            Ok(vec![Step::sync("blob", |_| {
                Ok(vec![0u8, 159, 146, 150].into())
            })])
        }
    }

    let pkg = Packager::build(
        fixture_files(),
        &BinaryRecipe,
        RuntimeVars::new(),
        BuildOptions::default(),
    )
    .unwrap();

    let built = pkg.to_json().await.unwrap();
    assert_eq!(built["blob"].as_bytes(), [0u8, 159, 146, 150].as_slice());
}
