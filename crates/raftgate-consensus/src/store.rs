//! On-disk snapshot storage.
//!
//! The node directory holds a single `snapshot.ndjson` file: one metadata
//! line `{"index":N}` followed by the state machine's snapshot bytes. Writes
//! go to a temporary file that is renamed over the previous snapshot.

use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "snapshot.ndjson";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    index: u64,
}

/// Snapshot file of one node.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Opens the store, creating the directory if needed.
    pub(crate) fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Atomically replaces the stored snapshot.
    pub(crate) fn save(&self, index: u64, data: &[u8]) -> Result<()> {
        let meta = serde_json::to_vec(&SnapshotMeta { index })
            .map_err(|e| ConsensusError::SnapshotStore(e.to_string()))?;

        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(&meta)?;
        file.write_all(b"\n")?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(self.path()).map_err(|e| e.error)?;

        Ok(())
    }

    /// Loads the stored snapshot, if any.
    pub(crate) fn load(&self) -> Result<Option<(u64, Vec<u8>)>> {
        let mut content = match std::fs::read(self.path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let newline = content
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| ConsensusError::SnapshotStore("missing snapshot metadata".into()))?;
        let meta: SnapshotMeta = serde_json::from_slice(&content[..newline])
            .map_err(|e| ConsensusError::SnapshotStore(format!("bad snapshot metadata: {}", e)))?;

        let data = content.split_off(newline + 1);
        Ok(Some((meta.index, data)))
    }
}
