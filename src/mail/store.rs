use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use super::error::SerializationError;
use super::types::ThreadRecord;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SerializationError {
    let path = path.to_path_buf();
    move |source| SerializationError::Io { path, source }
}

/// Write the thread collection as a JSON document at `path`.
///
/// The document is written to a temporary file next to the target and
/// renamed over it, so readers see either the old document or the complete
/// new one. Returns the absolute path of the written document.
pub fn save_threads(
    threads: &[ThreadRecord],
    path: &Path,
) -> Result<PathBuf, SerializationError> {
    let path = std::path::absolute(path).map_err(io_error(path))?;
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    // Ensure parent directory exists
    fs::create_dir_all(&parent).map_err(io_error(&parent))?;

    let tmp = NamedTempFile::new_in(&parent).map_err(io_error(&parent))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, threads)?;
        writer.flush().map_err(io_error(tmp.path()))?;
    }
    tmp.as_file().sync_all().map_err(io_error(tmp.path()))?;

    // Dropping an unpersisted temp file removes it, so a failure here
    // leaves nothing behind
    tmp.persist(&path)?;

    tracing::info!(path = %path.display(), threads = threads.len(), "saved threads");
    Ok(path)
}

/// Load a document written by [`save_threads`]
pub fn load_threads(path: &Path) -> Result<Vec<ThreadRecord>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let reader = BufReader::new(file);
    let threads = serde_json::from_reader(reader)
        .with_context(|| format!("{} is not a thread document", path.display()))?;
    Ok(threads)
}
