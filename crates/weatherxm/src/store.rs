//! Persistent store of configured stations.
//!
//! Records live in a single TOML file as an `[[entries]]` array. The file is
//! rewritten in full after every mutation.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::entry::ConfigRecord;
use crate::entry::EntryOptions;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access store file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse store file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Entry already exists: {0}")]
    DuplicateEntry(String),

    #[error("No such entry: {0}")]
    UnknownEntry(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    entries: Vec<ConfigRecord>,
}

/// Handle on the store file.
///
/// Several handles may share one file (the daemon and a CLI invocation).
/// Every mutation re-reads the file first and applies the change to what is
/// on disk, so a handle never writes back records it has gone stale on.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    entries: BTreeMap<String, ConfigRecord>,
}

impl ConfigStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path)?;

        debug!("Opened store {} with {} entries", path.display(), entries.len());
        Ok(Self { path, entries })
    }

    /// Pick up changes other handles made to the file.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.entries = read_entries(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConfigRecord> {
        self.entries.values()
    }

    pub fn get(&self, entry_id: &str) -> Option<&ConfigRecord> {
        self.entries.get(entry_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalized device ids of every configured station.
    pub fn configured_ids(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn insert(&mut self, record: ConfigRecord) -> Result<(), StoreError> {
        self.reload()?;
        if self.entries.contains_key(&record.entry_id) {
            return Err(StoreError::DuplicateEntry(record.entry_id));
        }
        info!(
            "Adding entry {} ({}, device {})",
            record.entry_id, record.display_name, record.device
        );
        self.entries.insert(record.entry_id.clone(), record);
        self.save()
    }

    pub fn update_options(
        &mut self,
        entry_id: &str,
        options: EntryOptions,
    ) -> Result<ConfigRecord, StoreError> {
        self.reload()?;
        let record = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| StoreError::UnknownEntry(entry_id.to_string()))?;
        record.options = options;
        let updated = record.clone();
        info!(
            "Entry {} now polls every {}",
            entry_id, updated.options.polling_interval
        );
        self.save()?;
        Ok(updated)
    }

    /// Change the display name. Returns `false` when the name was already current.
    pub fn rename(&mut self, entry_id: &str, display_name: &str) -> Result<bool, StoreError> {
        self.reload()?;
        let record = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| StoreError::UnknownEntry(entry_id.to_string()))?;
        if record.display_name == display_name {
            return Ok(false);
        }
        info!(
            "Renaming entry {}: {} -> {}",
            entry_id, record.display_name, display_name
        );
        record.display_name = display_name.to_string();
        self.save()?;
        Ok(true)
    }

    pub fn remove(&mut self, entry_id: &str) -> Result<ConfigRecord, StoreError> {
        self.reload()?;
        let record = self
            .entries
            .remove(entry_id)
            .ok_or_else(|| StoreError::UnknownEntry(entry_id.to_string()))?;
        info!("Removed entry {}", entry_id);
        self.save()?;
        Ok(record)
    }

    /// Write through a sibling temp file so readers never see a partial store
    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
        }

        let file = StoreFile {
            entries: self.entries.values().cloned().collect(),
        };
        let contents = toml::to_string_pretty(&file)?;

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents).map_err(|e| StoreError::Io(tmp.clone(), e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::Io(self.path.clone(), e))
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, ConfigRecord>, StoreError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let contents =
        std::fs::read_to_string(path).map_err(|e| StoreError::Io(path.to_path_buf(), e))?;
    let file: StoreFile =
        toml::from_str(&contents).map_err(|e| StoreError::Parse(path.to_path_buf(), e))?;
    Ok(file
        .entries
        .into_iter()
        .map(|r| (r.entry_id.clone(), r))
        .collect())
}
