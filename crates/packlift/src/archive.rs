//! ZIP archive emission.
//!
//! Serializes a built [`FileTree`] into a ZIP archive, one deflate-compressed
//! member per entry, optionally prefixing every member name with a base
//! directory. Writing runs on the blocking pool; the emitted byte size is
//! recorded in the statistics record under `"toZip"`.

use std::fs::File;
use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PackError;
use crate::stats::{track, SharedStats, STAT_TO_ZIP};
use crate::tree::{join_path, FileTree};

/// Where the archive bytes go.
pub enum ZipTarget {
    /// Create (or truncate) the file at this path.
    Path(PathBuf),
    /// Write into an already-open sink. The archive is staged in memory
    /// first, because the ZIP format needs a seekable writer, then copied
    /// out and flushed in one pass.
    Writer(Box<dyn Write + Send>),
}

impl ZipTarget {
    /// Target an already-open writable sink.
    pub fn writer(sink: impl Write + Send + 'static) -> Self {
        ZipTarget::Writer(Box::new(sink))
    }
}

impl From<PathBuf> for ZipTarget {
    fn from(path: PathBuf) -> Self {
        ZipTarget::Path(path)
    }
}

impl From<&Path> for ZipTarget {
    fn from(path: &Path) -> Self {
        ZipTarget::Path(path.to_path_buf())
    }
}

impl From<&str> for ZipTarget {
    fn from(path: &str) -> Self {
        ZipTarget::Path(PathBuf::from(path))
    }
}

impl std::fmt::Debug for ZipTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZipTarget::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ZipTarget::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Archive emission options.
#[derive(Debug, Clone, Default)]
pub struct ZipOptions {
    /// Prefix applied to every member name at emission time. The output
    /// tree itself is not modified.
    pub basedir: Option<String>,
}

impl ZipOptions {
    /// Options with a base directory prefix.
    pub fn basedir(dir: impl Into<String>) -> Self {
        ZipOptions {
            basedir: Some(dir.into()),
        }
    }
}

/// Emit `files` as a ZIP archive into `target`.
///
/// Tracked under `"toZip"`: elapsed time on success plus the final archive
/// size in bytes. Errors surface exactly once, as the returned `Err`.
pub(crate) async fn emit(
    files: FileTree,
    target: ZipTarget,
    options: ZipOptions,
    stats: SharedStats,
) -> Result<(), PackError> {
    let recorder = stats.clone();
    track(&stats, STAT_TO_ZIP, async move {
        let size = tokio::task::spawn_blocking(move || write_archive(files, target, options))
            .await
            .map_err(|err| PackError::Archive(format!("archive task failed: {err}")))??;
        recorder.record_size(STAT_TO_ZIP, size);
        debug!(size, "archive emitted");
        Ok(())
    })
    .await
}

fn write_archive(files: FileTree, target: ZipTarget, options: ZipOptions) -> Result<u64, PackError> {
    let basedir = options.basedir.as_deref();
    match target {
        ZipTarget::Path(path) => {
            let file = File::create(&path)?;
            let mut file = append_members(ZipWriter::new(file), &files, basedir)?;
            file.flush()?;
            Ok(file.stream_position()?)
        }
        ZipTarget::Writer(mut sink) => {
            let cursor = append_members(ZipWriter::new(Cursor::new(Vec::new())), &files, basedir)?;
            let bytes = cursor.into_inner();
            sink.write_all(&bytes)?;
            sink.flush()?;
            Ok(bytes.len() as u64)
        }
    }
}

fn append_members<W: Write + Seek>(
    mut zip: ZipWriter<W>,
    files: &FileTree,
    basedir: Option<&str>,
) -> Result<W, PackError> {
    let member_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, data) in files {
        let name = match basedir {
            Some(base) => join_path(base, path),
            None => path.clone(),
        };
        zip.start_file(name, member_options)?;
        zip.write_all(data.as_bytes())?;
    }

    Ok(zip.finish()?)
}
