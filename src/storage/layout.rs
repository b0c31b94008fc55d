use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::Result;

/// On-disk layout of a partition's working directory.
///
/// ```text
/// <base>/
///   meta/
///     checkpoint.bin
///     config.json
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
    pub meta_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: &Path) -> Result<Self> {
        let meta_dir = base_dir.join("meta");
        fs::create_dir_all(&meta_dir)?;
        Ok(StorageLayout {
            base_dir: base_dir.to_path_buf(),
            meta_dir,
        })
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.meta_dir.join("checkpoint.bin")
    }

    pub fn config_path(&self) -> PathBuf {
        self.meta_dir.join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_meta_dir_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path()).unwrap();
        assert!(layout.meta_dir.is_dir());
        assert!(layout.checkpoint_path().starts_with(&layout.meta_dir));
        // Re-opening an existing layout is fine.
        StorageLayout::new(dir.path()).unwrap();
    }
}
