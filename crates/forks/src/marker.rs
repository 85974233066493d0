use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the marker inside the node's data directory.
pub const MARKER_FILE_NAME: &str = "fork-marker.toml";

/// Persisted proof that a previous run already crossed the fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForkMarker {
    pub trigger_height: u64,
    pub activation_height: u64,
}

#[derive(Error, Debug)]
pub enum MarkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("marker parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("marker encode error: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Load the marker. A missing file is `Ok(None)`, which is the normal case for
/// a node that has never activated.
pub fn load_marker(path: &Path) -> Result<Option<ForkMarker>, MarkerError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let marker: ForkMarker = toml::from_str(&content)?;
    Ok(Some(marker))
}

/// Write the marker, creating the parent directory if needed.
pub fn write_marker(path: &Path, marker: &ForkMarker) -> Result<(), MarkerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string(marker)?;
    std::fs::write(path, content)?;
    Ok(())
}
