//! On-disk layout and crash-safe file helpers for the file backends.
//!
//! ```text
//! <data_dir>/workflows/<owner>/rules/<chain_id>.json
//! <data_dir>/workflows/<owner>/components/<chain_id>.json
//! <data_dir>/workflows/<owner>/runs/<chain_id>/<stamp>_<run_id>
//! <data_dir>/workflows/<owner>/sharenodes/{node|endpoint}/<id>.json
//! ```

use std::fs::Metadata;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rulevault_core::{ShareNodeKind, TimestampMs};
use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult, map_err};
use crate::types::ChainNamespace;

pub const DIR_WORKFLOWS: &str = "workflows";
pub const DIR_RUNS: &str = "runs";
pub const DIR_SHARE_NODES: &str = "sharenodes";
pub const JSON_SUFFIX: &str = ".json";

/// Path builder rooted at the data directory.
#[derive(Debug, Clone)]
pub struct Layout {
    data_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.data_dir.join(DIR_WORKFLOWS)
    }

    pub fn user_dir(&self, owner: &str) -> StoreResult<PathBuf> {
        Ok(self.workflows_dir().join(check_segment("owner", owner)?))
    }

    pub fn chains_dir(&self, owner: &str, ns: ChainNamespace) -> StoreResult<PathBuf> {
        Ok(self.user_dir(owner)?.join(ns.dir_name()))
    }

    pub fn chain_file(&self, owner: &str, ns: ChainNamespace, id: &str) -> StoreResult<PathBuf> {
        let id = check_segment("chain id", id)?;
        Ok(self.chains_dir(owner, ns)?.join(format!("{id}{JSON_SUFFIX}")))
    }

    pub fn runs_dir(&self, owner: &str) -> StoreResult<PathBuf> {
        Ok(self.user_dir(owner)?.join(DIR_RUNS))
    }

    pub fn chain_runs_dir(&self, owner: &str, chain_id: &str) -> StoreResult<PathBuf> {
        Ok(self.runs_dir(owner)?.join(check_segment("chain id", chain_id)?))
    }

    pub fn run_file(&self, owner: &str, chain_id: &str, run_id: &str) -> StoreResult<PathBuf> {
        Ok(self
            .chain_runs_dir(owner, chain_id)?
            .join(check_segment("run id", run_id)?))
    }

    pub fn share_dir(&self, owner: &str, kind: ShareNodeKind) -> StoreResult<PathBuf> {
        Ok(self
            .user_dir(owner)?
            .join(DIR_SHARE_NODES)
            .join(kind.as_str()))
    }

    pub fn share_file(&self, owner: &str, kind: ShareNodeKind, id: &str) -> StoreResult<PathBuf> {
        let id = check_segment("share node id", id)?;
        Ok(self.share_dir(owner, kind)?.join(format!("{id}{JSON_SUFFIX}")))
    }
}

/// Reject values that would escape their directory when used as a path segment.
pub fn check_segment<'a>(label: &str, value: &'a str) -> StoreResult<&'a str> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0')
    {
        return Err(StoreError::Validation(format!(
            "invalid {label}: {value:?}"
        )));
    }
    Ok(value)
}

/// Write through a temp file in the same directory, fsync, then rename over
/// the destination and fsync the directory so the rename survives power
/// loss. Readers see either the old or the new file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(dir).map_err(map_err!(Io))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(map_err!(Io))?;
    tmp.write_all(bytes).map_err(map_err!(Io))?;
    tmp.as_file().sync_all().map_err(map_err!(Io))?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error.to_string()))?;
    sync_dir(dir)
}

/// Flush a directory entry table. Directories cannot be opened for sync on
/// every platform, so this is a no-op outside unix.
pub fn sync_dir(dir: &Path) -> StoreResult<()> {
    if cfg!(unix) {
        std::fs::File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(map_err!(Io))?;
    }
    Ok(())
}

/// Read a file, mapping "does not exist" to `None`.
pub fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e.to_string())),
    }
}

/// Remove a file, returning whether it existed.
pub fn remove_optional(path: &Path) -> StoreResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::Io(e.to_string())),
    }
}

/// Modification time in epoch milliseconds, 0 when unavailable.
pub fn modified_ms(meta: &Metadata) -> TimestampMs {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as TimestampMs)
        .unwrap_or_default()
}

/// Strip the `.json` suffix from a directory entry name.
pub fn json_stem(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(JSON_SUFFIX)
        .filter(|stem| !stem.is_empty())
}
