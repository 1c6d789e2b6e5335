//! JSON files written by training and read back by serving: the pipeline
//! artifact, the metrics report and the global importance table.
//!
//! Writers never leave a half-written file at the target path. Each write
//! goes to a uniquely named hidden sibling, is flushed to disk and then
//! renamed over the target, so a serving process reading the artifact while
//! a retrain overwrites it sees either the old or the new file.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Serialize `data` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let mut bytes = serde_json::to_vec_pretty(data).map_err(io::Error::other)?;
    bytes.push(b'\n');
    atomic_write(path, &bytes)
}

/// Write `data` to a staging sibling, sync it, then rename over `path`.
/// Parent directories are created as needed; the staging file is removed
/// if any step fails.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let staging = staging_path(path)?;
    let result = write_synced(&staging, data).and_then(|()| fs::rename(&staging, path));
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result?;
    debug!(path = %path.display(), bytes = data.len(), "Wrote file");
    Ok(())
}

/// Load JSON from `path`; `Ok(None)` when the file does not exist. Decode
/// failures are `InvalidData` and name the file.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: {e}", path.display()),
            )
        })
}

fn staging_path(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let staging = format!(".{}.{}.tmp", name.to_string_lossy(), Uuid::new_v4().simple());
    Ok(path.with_file_name(staging))
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(data)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}
