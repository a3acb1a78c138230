//! In-memory pool and queue stores for tests and ephemeral runs.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{PoolStore, QueueEntry, QueueStore};

#[derive(Debug, Clone)]
struct MemQueueRow {
    id: i64,
    group_id: String,
    message_index: usize,
    scheduled_ms: i64,
    sent: bool,
}

#[derive(Default)]
struct Inner {
    // group id -> (message index -> sent flag)
    pools: HashMap<String, BTreeMap<usize, bool>>,
    queue: Vec<MemQueueRow>,
    next_queue_id: i64,
}

/// Map-backed implementation of both store contracts. Never fails, so the
/// log-and-no-op failure policy is trivially satisfied.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PoolStore for MemoryStore {
    fn initialize_pool(&self, group_id: &str, message_count: usize) -> bool {
        let mut inner = self.lock();
        let pool: BTreeMap<usize, bool> = (0..message_count).map(|i| (i, false)).collect();
        inner.pools.insert(group_id.to_string(), pool);
        true
    }

    fn available_indices(&self, group_id: &str) -> Vec<usize> {
        let inner = self.lock();
        inner
            .pools
            .get(group_id)
            .map(|pool| {
                pool.iter()
                    .filter(|(_, sent)| !**sent)
                    .map(|(i, _)| *i)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn mark_sent(&self, group_id: &str, index: usize) -> bool {
        let mut inner = self.lock();
        if let Some(sent) = inner.pools.get_mut(group_id).and_then(|p| p.get_mut(&index)) {
            *sent = true;
        }
        true
    }

    fn reset_pool(&self, group_id: &str) -> bool {
        let mut inner = self.lock();
        if let Some(pool) = inner.pools.get_mut(group_id) {
            for sent in pool.values_mut() {
                *sent = false;
            }
        }
        true
    }

    fn add_index(&self, group_id: &str, index: usize) -> bool {
        let mut inner = self.lock();
        inner
            .pools
            .entry(group_id.to_string())
            .or_default()
            .entry(index)
            .or_insert(false);
        true
    }

    fn remove_index(&self, group_id: &str, index: usize) -> bool {
        let mut inner = self.lock();
        if let Some(pool) = inner.pools.get_mut(group_id) {
            if pool.remove(&index).is_some() {
                let shifted: Vec<(usize, bool)> = pool
                    .range(index..)
                    .map(|(i, sent)| (*i, *sent))
                    .collect();
                for (i, _) in &shifted {
                    pool.remove(i);
                }
                for (i, sent) in shifted {
                    pool.insert(i - 1, sent);
                }
            }
        }
        true
    }

    fn pool_len(&self, group_id: &str) -> usize {
        let inner = self.lock();
        inner.pools.get(group_id).map(|p| p.len()).unwrap_or(0)
    }

    fn clear_pool(&self, group_id: &str) -> bool {
        let mut inner = self.lock();
        inner.pools.remove(group_id);
        true
    }
}

impl QueueStore for MemoryStore {
    fn enqueue(&self, group_id: &str, index: usize, scheduled_ms: i64) -> bool {
        let mut inner = self.lock();
        inner.next_queue_id += 1;
        let id = inner.next_queue_id;
        inner.queue.push(MemQueueRow {
            id,
            group_id: group_id.to_string(),
            message_index: index,
            scheduled_ms,
            sent: false,
        });
        true
    }

    fn due_entries(&self, now_ms: i64) -> Vec<QueueEntry> {
        let inner = self.lock();
        let mut due: Vec<QueueEntry> = inner
            .queue
            .iter()
            .filter(|row| !row.sent && row.scheduled_ms <= now_ms)
            .map(|row| QueueEntry {
                id: row.id,
                group_id: row.group_id.clone(),
                message_index: row.message_index,
                scheduled_ms: row.scheduled_ms,
            })
            .collect();
        // Insertion order is id order, so this matches the SQLite ordering.
        due.sort_by_key(|e| (e.scheduled_ms, e.id));
        due
    }

    fn mark_entry_sent(&self, entry_id: i64) -> bool {
        let mut inner = self.lock();
        if let Some(row) = inner.queue.iter_mut().find(|row| row.id == entry_id) {
            row.sent = true;
        }
        true
    }

    fn queue_len(&self) -> usize {
        let inner = self.lock();
        inner.queue.iter().filter(|row| !row.sent).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_cycle_matches_contract() {
        let s = MemoryStore::new();
        s.initialize_pool("tips", 3);
        assert_eq!(s.available_indices("tips"), vec![0, 1, 2]);

        s.mark_sent("tips", 1);
        assert_eq!(s.available_indices("tips"), vec![0, 2]);

        s.reset_pool("tips");
        assert_eq!(s.available_indices("tips"), vec![0, 1, 2]);
    }

    #[test]
    fn remove_index_renumbers_dense() {
        let s = MemoryStore::new();
        s.initialize_pool("tips", 5);
        s.mark_sent("tips", 3);

        s.remove_index("tips", 2);
        assert_eq!(s.pool_len("tips"), 4);
        assert_eq!(s.available_indices("tips"), vec![0, 1, 3]);
    }

    #[test]
    fn queue_orders_and_hides_sent() {
        let s = MemoryStore::new();
        s.enqueue("b", 0, 2_000);
        s.enqueue("a", 1, 1_000);

        let due = s.due_entries(2_000);
        assert_eq!(due[0].group_id, "a");
        assert_eq!(due[1].group_id, "b");

        s.mark_entry_sent(due[0].id);
        let due = s.due_entries(2_000);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].group_id, "b");
    }
}
