//! StorageConfig and resolve_paths for the sled-backed stores.

use crate::config::paths::xdg_root;
use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration
///
/// Empty paths resolve under `$XDG_DATA_HOME/acb/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// sled database holding contexts and agents
    #[serde(default)]
    pub data_path: Option<PathBuf>,

    /// sled database holding streamed payloads referenced by `payload_ref`
    #[serde(default)]
    pub blob_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve (data, blob) database locations.
    pub fn resolve_paths(&self) -> Result<(PathBuf, PathBuf), ApiError> {
        let data_path = match &self.data_path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => xdg_root::broker_data_dir()?.join("db"),
        };

        let blob_path = match &self.blob_path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => xdg_root::broker_data_dir()?.join("blobs"),
        };

        Ok((data_path, blob_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_paths_win() {
        let config = StorageConfig {
            data_path: Some(PathBuf::from("/tmp/acb-data")),
            blob_path: Some(PathBuf::from("/tmp/acb-blobs")),
        };
        let (data, blobs) = config.resolve_paths().unwrap();
        assert_eq!(data, PathBuf::from("/tmp/acb-data"));
        assert_eq!(blobs, PathBuf::from("/tmp/acb-blobs"));
    }
}
