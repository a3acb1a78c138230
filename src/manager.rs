//! Administrative operations for groups and their messages.
//!
//! Every mutation that changes a group's message list also updates the pool
//! store, so pool indices stay dense and in sync with the catalog.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::{valid_group_id, Catalog, MessageGroup};
use crate::error::{Error, Result};
use crate::store::PoolStore;

pub struct GroupManager {
    catalog: Catalog,
    pool: Arc<dyn PoolStore>,
}

impl GroupManager {
    pub fn new(catalog: Catalog, pool: Arc<dyn PoolStore>) -> Self {
        Self { catalog, pool }
    }

    pub fn groups(&self) -> Result<BTreeMap<String, MessageGroup>> {
        self.catalog.groups()
    }

    pub fn group(&self, group_id: &str) -> Result<MessageGroup> {
        self.catalog
            .group(group_id)?
            .ok_or_else(|| Error::NotFound(format!("Group not found: {}", group_id)))
    }

    pub fn create_group(
        &self,
        group_id: &str,
        name: &str,
        frequency: u32,
        prefix: &str,
        suffix: &str,
    ) -> Result<()> {
        if !valid_group_id(group_id) {
            return Err(Error::InvalidInput(format!(
                "Invalid group id '{}': use lowercase letters, digits, '-' and '_'",
                group_id
            )));
        }
        if frequency == 0 {
            return Err(Error::InvalidInput(
                "Frequency must be at least 1 minute".to_string(),
            ));
        }
        if self.catalog.group_exists(group_id)? {
            return Err(Error::InvalidInput(format!(
                "Group '{}' already exists",
                group_id
            )));
        }

        let group = MessageGroup::new(group_id, name, frequency, prefix, suffix);
        self.catalog.save_group(&group)?;
        self.pool.initialize_pool(group_id, 0);

        tracing::info!("Created group {}", group_id);
        Ok(())
    }

    /// Update a group's metadata; its message list is untouched.
    pub fn update_group(
        &self,
        group_id: &str,
        name: &str,
        frequency: u32,
        prefix: &str,
        suffix: &str,
    ) -> Result<()> {
        if frequency == 0 {
            return Err(Error::InvalidInput(
                "Frequency must be at least 1 minute".to_string(),
            ));
        }

        let mut group = self.group(group_id)?;
        group.name = name.to_string();
        group.frequency = frequency;
        group.prefix = prefix.to_string();
        group.suffix = suffix.to_string();
        self.catalog.save_group(&group)?;

        tracing::info!("Updated group {}", group_id);
        Ok(())
    }

    pub fn delete_group(&self, group_id: &str) -> Result<()> {
        if !self.catalog.delete_group(group_id)? {
            return Err(Error::NotFound(format!("Group not found: {}", group_id)));
        }
        self.pool.clear_pool(group_id);

        tracing::info!("Deleted group {}", group_id);
        Ok(())
    }

    /// Append a message; returns its index.
    pub fn add_message(&self, group_id: &str, text: &str) -> Result<usize> {
        let mut group = self.group(group_id)?;
        let index = group.messages.len();
        group.messages.push(text.to_string());
        self.catalog.save_group(&group)?;
        self.pool.add_index(group_id, index);

        tracing::info!("Added message {} to group {}", index, group_id);
        Ok(index)
    }

    /// Replace message text in place. Indices (and pool state) are stable.
    pub fn update_message(&self, group_id: &str, index: usize, text: &str) -> Result<()> {
        let mut group = self.group(group_id)?;
        let message_count = group.message_count();
        let slot = group.messages.get_mut(index).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Message index {} out of range for group {} ({} messages)",
                index, group_id, message_count
            ))
        })?;
        *slot = text.to_string();
        self.catalog.save_group(&group)?;
        Ok(())
    }

    /// Remove a message. Later messages shift down one index; the pool store
    /// renumbers atomically to match.
    pub fn delete_message(&self, group_id: &str, index: usize) -> Result<()> {
        let mut group = self.group(group_id)?;
        if index >= group.message_count() {
            return Err(Error::InvalidInput(format!(
                "Message index {} out of range for group {} ({} messages)",
                index,
                group_id,
                group.message_count()
            )));
        }

        group.messages.remove(index);
        self.catalog.save_group(&group)?;
        self.pool.remove_index(group_id, index);

        tracing::info!("Deleted message {} from group {}", index, group_id);
        Ok(())
    }

    /// One page of a group's messages as (index, text) pairs. Pages are
    /// 1-based, matching the admin surface.
    pub fn messages_page(
        &self,
        group_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<(usize, String)>> {
        let group = self.group(group_id)?;
        let start = page.saturating_sub(1) * page_size;
        Ok(group
            .messages
            .iter()
            .enumerate()
            .skip(start)
            .take(page_size)
            .map(|(i, m)| (i, m.clone()))
            .collect())
    }

    pub fn total_pages(&self, group_id: &str, page_size: usize) -> Result<usize> {
        let group = self.group(group_id)?;
        Ok(group.message_count().div_ceil(page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PoolStore};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        manager: GroupManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let manager = GroupManager::new(
            Catalog::open(dir.path().join("groups.json")),
            store.clone(),
        );
        Fixture {
            _dir: dir,
            store,
            manager,
        }
    }

    #[test]
    fn create_rejects_duplicates_and_bad_ids() {
        let f = fixture();
        f.manager.create_group("tips", "Tips", 10, "", "").unwrap();

        assert!(matches!(
            f.manager.create_group("tips", "Again", 5, "", ""),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.manager.create_group("Bad Id", "x", 5, "", ""),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.manager.create_group("zero", "x", 0, "", ""),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn add_message_extends_pool() {
        let f = fixture();
        f.manager.create_group("tips", "Tips", 10, "", "").unwrap();

        assert_eq!(f.manager.add_message("tips", "first").unwrap(), 0);
        assert_eq!(f.manager.add_message("tips", "second").unwrap(), 1);
        assert_eq!(f.store.available_indices("tips"), vec![0, 1]);
    }

    #[test]
    fn delete_message_renumbers_catalog_and_pool_together() {
        let f = fixture();
        f.manager.create_group("tips", "Tips", 10, "", "").unwrap();
        for text in ["a", "b", "c", "d", "e"] {
            f.manager.add_message("tips", text).unwrap();
        }
        f.store.mark_sent("tips", 3);

        f.manager.delete_message("tips", 2).unwrap();

        let group = f.manager.group("tips").unwrap();
        assert_eq!(group.messages, vec!["a", "b", "d", "e"]);
        // Old index 3 ("d") is now index 2 and still counts as sent.
        assert_eq!(f.store.pool_len("tips"), 4);
        assert_eq!(f.store.available_indices("tips"), vec![0, 1, 3]);
    }

    #[test]
    fn delete_message_rejects_out_of_range_without_mutation() {
        let f = fixture();
        f.manager.create_group("tips", "Tips", 10, "", "").unwrap();
        f.manager.add_message("tips", "only").unwrap();

        assert!(matches!(
            f.manager.delete_message("tips", 1),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(f.manager.group("tips").unwrap().message_count(), 1);
        assert_eq!(f.store.pool_len("tips"), 1);
    }

    #[test]
    fn update_message_leaves_pool_untouched() {
        let f = fixture();
        f.manager.create_group("tips", "Tips", 10, "", "").unwrap();
        f.manager.add_message("tips", "old").unwrap();
        f.store.mark_sent("tips", 0);

        f.manager.update_message("tips", 0, "new").unwrap();
        assert_eq!(f.manager.group("tips").unwrap().messages, vec!["new"]);
        assert!(f.store.available_indices("tips").is_empty());
    }

    #[test]
    fn delete_group_clears_pool() {
        let f = fixture();
        f.manager.create_group("tips", "Tips", 10, "", "").unwrap();
        f.manager.add_message("tips", "a").unwrap();

        f.manager.delete_group("tips").unwrap();
        assert!(matches!(
            f.manager.group("tips"),
            Err(Error::NotFound(_))
        ));
        assert_eq!(f.store.pool_len("tips"), 0);

        assert!(matches!(
            f.manager.delete_group("tips"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn message_paging() {
        let f = fixture();
        f.manager.create_group("tips", "Tips", 10, "", "").unwrap();
        for i in 0..7 {
            f.manager.add_message("tips", &format!("m{}", i)).unwrap();
        }

        assert_eq!(f.manager.total_pages("tips", 3).unwrap(), 3);
        let page2 = f.manager.messages_page("tips", 2, 3).unwrap();
        assert_eq!(
            page2,
            vec![
                (3, "m3".to_string()),
                (4, "m4".to_string()),
                (5, "m5".to_string())
            ]
        );
        let page3 = f.manager.messages_page("tips", 3, 3).unwrap();
        assert_eq!(page3, vec![(6, "m6".to_string())]);
    }
}
