//! JSON sidecar recording that a data file is complete.
//!
//! A data file without a valid sidecar is a partial write and is discarded
//! on startup.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use packsound_common::{CanonicalId, SourceInfo, TargetFormat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidecarState {
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub id: CanonicalId,
    pub state: SidecarState,
    pub format: TargetFormat,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub info: SourceInfo,
}

/// Path of the sidecar belonging to `id` in `dir`.
pub fn sidecar_path(dir: &Path, id: &CanonicalId) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Write a sidecar atomically (temp file, fsync, rename).
pub fn write(path: &Path, sidecar: &Sidecar) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(sidecar).map_err(io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Read a sidecar, returning `None` if it is missing or malformed.
pub fn read(path: &Path) -> Option<Sidecar> {
    let content = std::fs::read(path).ok()?;
    match serde_json::from_slice(&content) {
        Ok(sidecar) => Some(sidecar),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "ignoring malformed sidecar");
            None
        }
    }
}
