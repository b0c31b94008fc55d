use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{Error, ErrorKind, Result};
use crate::partition::StoredEntry;

/// Full snapshot of a partition's durable state. Indices are not stored;
/// they are rebuilt from the entries on load.
///
/// File format: 4-byte little-endian crc32 of the bincode payload, then the
/// payload itself.
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub suffix_ndn: String,
    pub next_id: u64,
    pub properties: HashMap<String, String>,
    pub user_indices: Vec<String>,
    pub entries: Vec<StoredEntry>,
}

impl Checkpoint {
    pub fn new(
        suffix_ndn: String,
        next_id: u64,
        properties: HashMap<String, String>,
        user_indices: Vec<String>,
        entries: Vec<StoredEntry>,
    ) -> Self {
        Checkpoint {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            suffix_ndn,
            next_id,
            properties,
            user_indices,
            entries,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let payload = bincode::serialize(self)?;
        let crc = crc32fast::hash(&payload);
        let mut data = Vec::with_capacity(4 + payload.len());
        data.extend_from_slice(&crc.to_le_bytes());
        data.extend_from_slice(&payload);
        fs::write(path, data)?;
        log::debug!(
            "checkpoint {} written: {} entries, {} bytes",
            self.id,
            self.entries.len(),
            payload.len()
        );
        Ok(())
    }

    /// Returns Ok(None) when no checkpoint file exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.len() < 4 {
            return Err(corrupted(path, "file shorter than checksum header"));
        }
        let stored_crc = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let payload = &data[4..];
        if crc32fast::hash(payload) != stored_crc {
            return Err(corrupted(path, "checksum mismatch"));
        }
        let checkpoint = bincode::deserialize(payload)?;
        Ok(Some(checkpoint))
    }
}

fn corrupted(path: &Path, detail: &str) -> Error {
    Error::new(
        ErrorKind::Corrupted,
        format!("checkpoint {}: {}", path.display(), detail),
    )
}
