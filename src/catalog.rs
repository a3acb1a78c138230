//! Message group catalog backed by a JSON file.
//!
//! The catalog is the source of truth for group definitions. It is loaded on
//! every read so admin edits from another process are visible to the
//! scheduler on its next tick.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::config::get_groups_path;
use crate::error::{Error, Result};

/// A named group of rotating messages.
///
/// Message order is significant: the position of a message in `messages` is
/// its index in the pool and queue stores.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageGroup {
    pub id: String,
    pub name: String,
    /// Send frequency in minutes.
    pub frequency: u32,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl MessageGroup {
    pub fn new(id: &str, name: &str, frequency: u32, prefix: &str, suffix: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            frequency,
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Check a group id against the allowed shape.
pub fn valid_group_id(id: &str) -> bool {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,32}$").expect("group id regex"));
    re.is_match(id)
}

/// Catalog file format.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
struct CatalogFile {
    groups: BTreeMap<String, MessageGroup>,
}

/// File-backed group catalog.
pub struct Catalog {
    path: PathBuf,
}

impl Catalog {
    /// Open the catalog at the default location (~/.rotocast/groups.json).
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(get_groups_path()?))
    }

    /// Open a catalog at an explicit path.
    pub fn open(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Result<CatalogFile> {
        if !self.path.exists() {
            return Ok(CatalogFile::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let file: CatalogFile = serde_json::from_str(&content)
            .map_err(|e| Error::Catalog(format!("parse {}: {}", self.path.display(), e)))?;
        Ok(file)
    }

    fn save(&self, file: &CatalogFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(file)?)?;
        Ok(())
    }

    /// All groups, keyed by id. BTreeMap keeps iteration order stable, which
    /// the scheduler relies on when spreading collisions.
    pub fn groups(&self) -> Result<BTreeMap<String, MessageGroup>> {
        Ok(self.load()?.groups)
    }

    /// Look up a single group.
    pub fn group(&self, id: &str) -> Result<Option<MessageGroup>> {
        Ok(self.load()?.groups.get(id).cloned())
    }

    pub fn group_exists(&self, id: &str) -> Result<bool> {
        Ok(self.load()?.groups.contains_key(id))
    }

    /// Insert or replace a group definition.
    pub fn save_group(&self, group: &MessageGroup) -> Result<()> {
        let mut file = self.load()?;
        file.groups.insert(group.id.clone(), group.clone());
        self.save(&file)
    }

    /// Remove a group. Returns false if it did not exist.
    pub fn delete_group(&self, id: &str) -> Result<bool> {
        let mut file = self.load()?;
        let existed = file.groups.remove(id).is_some();
        if existed {
            self.save(&file)?;
        }
        Ok(existed)
    }
}
