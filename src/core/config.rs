use serde::{Serialize, Deserialize};
use std::fs;
use std::path::{Path, PathBuf};
use crate::core::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Suffix DN this partition is responsible for.
    pub suffix_dn: String,
    /// Working directory for checkpoints; None keeps the partition in memory.
    pub working_dir: Option<PathBuf>,
    /// Attributes given a user index at open time.
    pub indexed_attributes: Vec<String>,
    /// Checkpoint after every write instead of only on sync()/close().
    pub sync_on_write: bool,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        PartitionConfig {
            suffix_dn: "dc=example,dc=com".to_string(),
            working_dir: None,
            indexed_attributes: Vec::new(),
            sync_on_write: false,
        }
    }
}

impl PartitionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config = serde_json::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = PartitionConfig {
            suffix_dn: "o=acme".to_string(),
            working_dir: Some(dir.path().to_path_buf()),
            indexed_attributes: vec!["cn".to_string(), "sn".to_string()],
            sync_on_write: true,
        };
        config.save(&path).unwrap();

        let loaded = PartitionConfig::load(&path).unwrap();
        assert_eq!(loaded.suffix_dn, "o=acme");
        assert_eq!(loaded.indexed_attributes, vec!["cn", "sn"]);
        assert!(loaded.sync_on_write);
    }
}
