//! Ids of posts and messages that were already digested.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::portal::id_string;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SeenFile {
    #[serde(default, deserialize_with = "id_set")]
    message_ids: BTreeSet<String>,
    #[serde(default, deserialize_with = "id_set")]
    post_ids: BTreeSet<String>,
}

/// Ids written by older versions may be numbers.
fn id_set<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = Vec::<Value>::deserialize(deserializer)?;
    Ok(ids.iter().filter_map(id_string).collect())
}

/// On-disk set of seen post and message ids.
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
    seen: SeenFile,
    dirty: bool,
}

impl SeenStore {
    /// Load the store at `path`.
    ///
    /// A missing file gives an empty store. An unreadable or corrupt file is
    /// logged and also gives an empty store; it is overwritten on the next save.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let seen = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                log::warn!("ignoring corrupt seen store {}: {e}", path.display());
                SeenFile::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SeenFile::default(),
            Err(e) => {
                log::warn!("cannot read seen store {}: {e}", path.display());
                SeenFile::default()
            }
        };

        Self {
            path: path.to_path_buf(),
            seen,
            dirty: false,
        }
    }

    /// Location the store saves to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the post id was seen before.
    #[must_use]
    pub fn contains_post(&self, id: &str) -> bool {
        self.seen.post_ids.contains(id)
    }

    /// Whether the message id was seen before.
    #[must_use]
    pub fn contains_message(&self, id: &str) -> bool {
        self.seen.message_ids.contains(id)
    }

    /// Record a post id.
    pub fn mark_post(&mut self, id: &str) {
        self.dirty |= self.seen.post_ids.insert(id.to_string());
    }

    /// Record a message id.
    pub fn mark_message(&mut self, id: &str) {
        self.dirty |= self.seen.message_ids.insert(id.to_string());
    }

    /// Seen post ids in sorted order.
    pub fn post_ids(&self) -> impl Iterator<Item = &str> {
        self.seen.post_ids.iter().map(String::as_str)
    }

    /// Seen message ids in sorted order.
    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        self.seen.message_ids.iter().map(String::as_str)
    }

    /// Number of stored ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.post_ids.len() + self.seen.message_ids.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every id.
    pub fn clear(&mut self) {
        self.dirty |= !self.is_empty();
        self.seen = SeenFile::default();
    }

    /// Whether there are unsaved changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the store, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.seen)
            .map_err(|e| CoreError::Serialization(format!("seen store: {e}")))?;
        fs::write(&self.path, json)?;
        self.dirty = false;
        log::debug!("saved {} seen id(s) to {}", self.len(), self.path.display());
        Ok(())
    }
}
