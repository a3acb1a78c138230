//! The rotation scheduling engine.
//!
//! One tick per minute: drain the deferred-broadcast queue, detect due
//! groups, pick non-repeating messages, and spread same-minute collisions
//! across consecutive future minutes. At most one broadcast leaves the
//! scheduler per wall-clock minute.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::broadcast::BroadcastSink;
use crate::catalog::{Catalog, MessageGroup};
use crate::error::{Error, Result};
use crate::store::{PoolStore, QueueStore};

const MINUTE_MS: i64 = 60_000;

fn minute_of(ms: i64) -> i64 {
    ms / MINUTE_MS
}

/// In-memory scheduler bookkeeping.
///
/// Rebuilt from scratch on restart and on reload. Not persisted: losing it
/// costs at most one extra broadcast in the restart minute, and a group due
/// just before shutdown may fire again right after startup.
#[derive(Debug, Default)]
pub struct SchedulerState {
    /// When the last broadcast left this scheduler, in millis. Compared at
    /// minute granularity to enforce one immediate broadcast per minute.
    last_broadcast_ms: i64,
    /// Per-group last-sent millis. Absent means "never", which makes the
    /// group due on the first eligible tick.
    last_sent_ms: HashMap<String, i64>,
}

pub struct RotationScheduler {
    catalog: Catalog,
    pool: Arc<dyn PoolStore>,
    queue: Arc<dyn QueueStore>,
    sink: Arc<dyn BroadcastSink>,
    rng: StdRng,
    state: SchedulerState,
}

impl RotationScheduler {
    pub fn new(
        catalog: Catalog,
        pool: Arc<dyn PoolStore>,
        queue: Arc<dyn QueueStore>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Self {
        Self::with_rng(catalog, pool, queue, sink, StdRng::from_entropy())
    }

    /// Seeded variant so tests can assert exact selection sequences.
    pub fn with_rng(
        catalog: Catalog,
        pool: Arc<dyn PoolStore>,
        queue: Arc<dyn QueueStore>,
        sink: Arc<dyn BroadcastSink>,
        rng: StdRng,
    ) -> Self {
        Self {
            catalog,
            pool,
            queue,
            sink,
            rng,
            state: SchedulerState::default(),
        }
    }

    /// Bring pools in line with the catalog. Called once at daemon start and
    /// again on reload. Pools whose size already matches the catalog are
    /// left alone so rotation progress survives restarts; only exhausted
    /// pools are reset.
    pub fn initialize(&mut self) -> Result<()> {
        self.sync_pools()
    }

    /// Clear in-memory state and re-synchronize pools against the catalog.
    pub fn reload(&mut self) -> Result<()> {
        self.state = SchedulerState::default();
        self.sync_pools()
    }

    fn sync_pools(&self) -> Result<()> {
        let groups = self.catalog.groups()?;
        for group in groups.values() {
            let count = group.message_count();
            if self.pool.pool_len(&group.id) != count {
                self.pool.initialize_pool(&group.id, count);
            }
            if count > 0 && self.pool.available_indices(&group.id).is_empty() {
                self.pool.reset_pool(&group.id);
            }
        }
        Ok(())
    }

    /// One scheduler tick.
    ///
    /// Time comes in as an argument: the daemon passes wall-clock millis,
    /// tests drive minutes explicitly.
    pub async fn tick(&mut self, now_ms: i64) {
        if self.sink.audience_empty() {
            tracing::debug!("Skipping tick - audience is empty");
            return;
        }

        // Pre-drain state decides whether due-group detection runs at all;
        // selection recomputes the minute check afterwards, so a drain that
        // broadcasts this minute still blocks immediate sends below.
        let gate_open = minute_of(now_ms) > minute_of(self.state.last_broadcast_ms);

        self.drain_queue(now_ms).await;

        if gate_open {
            self.schedule_due_groups(now_ms).await;
        }
    }

    /// Drain the deferred-broadcast queue: send the first live entry, push
    /// the rest one minute apart into the future.
    async fn drain_queue(&mut self, now_ms: i64) {
        let due = self.queue.due_entries(now_ms);
        if due.is_empty() {
            return;
        }

        let groups = match self.catalog.groups() {
            Ok(groups) => groups,
            Err(e) => {
                tracing::error!("Catalog unreadable during queue drain: {}", e);
                return;
            }
        };

        let mut remaining = Vec::new();
        let mut broadcast_done = false;

        for entry in due {
            if broadcast_done {
                remaining.push(entry);
                continue;
            }

            match groups.get(&entry.group_id) {
                Some(group) if entry.message_index < group.message_count() => {
                    self.send_message(group, entry.message_index).await;
                    self.queue.mark_entry_sent(entry.id);
                    self.state.last_broadcast_ms = now_ms;
                    broadcast_done = true;
                }
                _ => {
                    // Group vanished or the index was renumbered away. Mark
                    // the entry consumed so it cannot wedge the queue head.
                    tracing::warn!(
                        "Dropping stale queue entry {} for {}[{}]",
                        entry.id,
                        entry.group_id,
                        entry.message_index
                    );
                    self.queue.mark_entry_sent(entry.id);
                }
            }
        }

        for (k, entry) in remaining.iter().enumerate() {
            let next_ms = now_ms + MINUTE_MS * (k as i64 + 1);
            self.queue
                .enqueue(&entry.group_id, entry.message_index, next_ms);
            self.queue.mark_entry_sent(entry.id);
        }
    }

    /// Detect due groups and either broadcast immediately or spread them
    /// across consecutive minutes through the queue.
    async fn schedule_due_groups(&mut self, now_ms: i64) {
        let groups = match self.catalog.groups() {
            Ok(groups) => groups,
            Err(e) => {
                tracing::error!("Catalog unreadable during due-group scan: {}", e);
                return;
            }
        };

        let due: Vec<&MessageGroup> = groups
            .values()
            .filter(|g| g.message_count() > 0 && self.is_due(g, now_ms))
            .collect();

        if due.is_empty() {
            return;
        }

        let minute_open = minute_of(now_ms) > minute_of(self.state.last_broadcast_ms);

        if due.len() == 1 {
            if minute_open {
                self.send_random(due[0], now_ms).await;
            }
            return;
        }

        for (i, &group) in due.iter().enumerate() {
            let Some(index) = self.select_index(&group.id) else {
                continue;
            };

            if i == 0 && minute_open {
                self.send_message(group, index).await;
                self.pool.mark_sent(&group.id, index);
                self.state.last_broadcast_ms = now_ms;
            } else {
                let scheduled_ms = now_ms + MINUTE_MS * i as i64;
                self.queue.enqueue(&group.id, index, scheduled_ms);
                self.pool.mark_sent(&group.id, index);
            }

            self.state.last_sent_ms.insert(group.id.clone(), now_ms);
        }
    }

    fn is_due(&self, group: &MessageGroup, now_ms: i64) -> bool {
        match self.state.last_sent_ms.get(&group.id) {
            Some(last) => (now_ms - last) / MINUTE_MS >= group.frequency as i64,
            // Never sent while this scheduler has been alive.
            None => true,
        }
    }

    /// Pick a not-yet-sent index uniformly at random, resetting the pool if
    /// the cycle is exhausted. None only when the group has no messages (or
    /// the store silently failed).
    fn select_index(&mut self, group_id: &str) -> Option<usize> {
        let mut available = self.pool.available_indices(group_id);
        if available.is_empty() {
            self.pool.reset_pool(group_id);
            available = self.pool.available_indices(group_id);
        }
        if available.is_empty() {
            return None;
        }
        let pick = self.rng.gen_range(0..available.len());
        Some(available[pick])
    }

    async fn send_random(&mut self, group: &MessageGroup, now_ms: i64) {
        let Some(index) = self.select_index(&group.id) else {
            return;
        };

        self.send_message(group, index).await;
        self.pool.mark_sent(&group.id, index);
        self.state.last_sent_ms.insert(group.id.clone(), now_ms);
        self.state.last_broadcast_ms = now_ms;
    }

    /// Decorate and hand one message to the sink. Out-of-range index is a
    /// no-op.
    async fn send_message(&self, group: &MessageGroup, index: usize) {
        let Some(message) = group.messages.get(index) else {
            return;
        };

        let text = format!("{}{}{}", group.prefix, message, group.suffix);
        self.sink.broadcast(&text).await;
        tracing::info!("Broadcast {}[{}]", group.id, index);
    }

    /// Broadcast a specific message right now, bypassing due-detection.
    /// The index is marked sent in the pool only if it was still available,
    /// so a force-send cannot corrupt an exhausted cycle's accounting.
    pub async fn force_send(&mut self, group_id: &str, index: usize) -> Result<()> {
        let group = self
            .catalog
            .group(group_id)?
            .ok_or_else(|| Error::NotFound(format!("Group not found: {}", group_id)))?;

        if index >= group.message_count() {
            return Err(Error::InvalidInput(format!(
                "Message index {} out of range for group {} ({} messages)",
                index,
                group_id,
                group.message_count()
            )));
        }

        self.send_message(&group, index).await;

        if self.pool.available_indices(group_id).contains(&index) {
            self.pool.mark_sent(group_id, index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastSink;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct RecordingSink {
        messages: Mutex<Vec<String>>,
        empty: AtomicBool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
                empty: AtomicBool::new(false),
            }
        }

        fn sent(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }

        fn set_empty(&self, empty: bool) {
            self.empty.store(empty, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl BroadcastSink for RecordingSink {
        async fn broadcast(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }

        fn audience_empty(&self) -> bool {
            self.empty.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        catalog_path: std::path::PathBuf,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        scheduler: RotationScheduler,
    }

    fn minutes(n: i64) -> i64 {
        n * MINUTE_MS
    }

    fn harness(groups: &[(&str, u32, &[&str])]) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("groups.json");
        let catalog = Catalog::open(catalog_path.clone());

        for (id, frequency, messages) in groups {
            let mut group = MessageGroup::new(id, id, *frequency, "", "");
            group.messages = messages.iter().map(|m| m.to_string()).collect();
            catalog.save_group(&group).unwrap();
        }

        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());

        let mut scheduler = RotationScheduler::with_rng(
            Catalog::open(catalog_path.clone()),
            store.clone(),
            store.clone(),
            sink.clone(),
            StdRng::seed_from_u64(7),
        );
        scheduler.initialize().unwrap();

        Harness {
            _dir: dir,
            catalog_path,
            store,
            sink,
            scheduler,
        }
    }

    #[tokio::test]
    async fn no_repeat_until_cycle_exhausted() {
        let mut h = harness(&[("tips", 1, &["a", "b", "c"])]);

        for minute in 1..=3 {
            h.scheduler.tick(minutes(minute * 2)).await;
        }

        let mut first_cycle = h.sink.sent();
        first_cycle.sort();
        assert_eq!(first_cycle, vec!["a", "b", "c"]);

        // Fourth selection starts a fresh cycle.
        h.scheduler.tick(minutes(8)).await;
        let sent = h.sink.sent();
        assert_eq!(sent.len(), 4);
        assert!(["a", "b", "c"].contains(&sent[3].as_str()));
    }

    #[tokio::test]
    async fn collision_spreads_second_group_one_minute_later() {
        let mut h = harness(&[("alpha", 60, &["from alpha"]), ("beta", 60, &["from beta"])]);

        h.scheduler.tick(minutes(1)).await;
        assert_eq!(h.sink.sent(), vec!["from alpha"]);

        // Second group's pick sits in the queue, due exactly one minute on.
        let due = h.store.due_entries(minutes(2));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].group_id, "beta");
        assert_eq!(due[0].scheduled_ms, minutes(2));
        assert!(h.store.due_entries(minutes(1)).is_empty());

        h.scheduler.tick(minutes(2)).await;
        assert_eq!(h.sink.sent(), vec!["from alpha", "from beta"]);
    }

    #[tokio::test]
    async fn drain_is_idempotent_for_same_now() {
        let mut h = harness(&[("tips", 9999, &["queued text"])]);
        h.store.enqueue("tips", 0, minutes(5));

        h.scheduler.tick(minutes(5)).await;
        h.scheduler.tick(minutes(5)).await;

        assert_eq!(h.sink.sent(), vec!["queued text"]);
    }

    #[tokio::test]
    async fn stale_queue_entries_do_not_wedge_the_head() {
        let mut h = harness(&[("tips", 9999, &["live"])]);
        h.store.enqueue("gone", 0, minutes(4));
        h.store.enqueue("tips", 7, minutes(4));
        h.store.enqueue("tips", 0, minutes(5));

        h.scheduler.tick(minutes(5)).await;

        assert_eq!(h.sink.sent(), vec!["live"]);
        assert_eq!(h.store.queue_len(), 0);
    }

    #[tokio::test]
    async fn empty_audience_skips_without_losing_due_status() {
        let mut h = harness(&[("tips", 1, &["a", "b"])]);
        h.sink.set_empty(true);

        for minute in 1..=3 {
            h.scheduler.tick(minutes(minute)).await;
        }
        assert!(h.sink.sent().is_empty());
        assert_eq!(h.store.queue_len(), 0);

        h.sink.set_empty(false);
        h.scheduler.tick(minutes(4)).await;
        assert_eq!(h.sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn tips_scenario_runs_full_cycle() {
        let mut h = harness(&[("tips", 10, &["a", "b", "c"])]);

        h.scheduler.tick(minutes(1)).await;
        assert_eq!(h.sink.sent().len(), 1);
        assert_eq!(h.store.available_indices("tips").len(), 2);

        h.scheduler.tick(minutes(11)).await;
        assert_eq!(h.sink.sent().len(), 2);
        assert_eq!(h.store.available_indices("tips").len(), 1);

        h.scheduler.tick(minutes(21)).await;
        let mut cycle = h.sink.sent();
        assert!(h.store.available_indices("tips").is_empty());
        cycle.sort();
        assert_eq!(cycle, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn queue_drain_blocks_same_minute_selection() {
        let mut h = harness(&[("tips", 1, &["fresh"])]);
        h.store.enqueue("tips", 0, minutes(3));

        // The drain broadcast consumes minute 3; the due group must wait.
        h.scheduler.tick(minutes(3)).await;
        assert_eq!(h.sink.sent().len(), 1);

        h.scheduler.tick(minutes(4)).await;
        assert_eq!(h.sink.sent().len(), 2);
    }

    #[tokio::test]
    async fn force_send_marks_pool_only_when_available() {
        let mut h = harness(&[("tips", 9999, &["a", "b"])]);

        h.scheduler.force_send("tips", 1).await.unwrap();
        assert_eq!(h.sink.sent(), vec!["b"]);
        assert_eq!(h.store.available_indices("tips"), vec![0]);

        // Exhaust the cycle, then force-send again: accounting is untouched.
        h.store.mark_sent("tips", 0);
        h.scheduler.force_send("tips", 1).await.unwrap();
        assert_eq!(h.sink.sent(), vec!["b", "b"]);
        assert!(h.store.available_indices("tips").is_empty());
    }

    #[tokio::test]
    async fn force_send_rejects_bad_targets() {
        let mut h = harness(&[("tips", 9999, &["a"])]);

        assert!(matches!(
            h.scheduler.force_send("tips", 5).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            h.scheduler.force_send("nope", 0).await,
            Err(Error::NotFound(_))
        ));
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn reload_resets_state_and_syncs_pools() {
        let mut h = harness(&[("tips", 30, &["a", "b"])]);

        h.scheduler.tick(minutes(1)).await;
        assert_eq!(h.sink.sent().len(), 1);

        // Not due again for 30 minutes...
        h.scheduler.tick(minutes(3)).await;
        assert_eq!(h.sink.sent().len(), 1);

        // ...but reload forgets last-sent bookkeeping, so the group fires on
        // the next eligible minute.
        h.scheduler.reload().unwrap();
        h.scheduler.tick(minutes(4)).await;
        assert_eq!(h.sink.sent().len(), 2);
    }

    #[tokio::test]
    async fn initialize_preserves_rotation_progress() {
        let mut h = harness(&[("tips", 10, &["a", "b", "c"])]);

        h.scheduler.tick(minutes(1)).await;
        let after_first = h.store.available_indices("tips");
        assert_eq!(after_first.len(), 2);

        // A restart re-runs initialize; the half-finished cycle survives.
        let mut restarted = RotationScheduler::with_rng(
            Catalog::open(h.catalog_path.clone()),
            h.store.clone(),
            h.store.clone(),
            h.sink.clone(),
            StdRng::seed_from_u64(11),
        );
        restarted.initialize().unwrap();
        assert_eq!(h.store.available_indices("tips"), after_first);
    }

    #[tokio::test]
    async fn initialize_resets_exhausted_pool() {
        let h = harness(&[("tips", 10, &["a", "b"])]);
        h.store.mark_sent("tips", 0);
        h.store.mark_sent("tips", 1);

        let mut scheduler = RotationScheduler::with_rng(
            Catalog::open(h.catalog_path.clone()),
            h.store.clone(),
            h.store.clone(),
            h.sink.clone(),
            StdRng::seed_from_u64(3),
        );
        scheduler.initialize().unwrap();
        assert_eq!(h.store.available_indices("tips"), vec![0, 1]);
    }

    #[tokio::test]
    async fn three_way_collision_spreads_over_three_minutes() {
        let mut h = harness(&[
            ("a", 60, &["msg a"]),
            ("b", 60, &["msg b"]),
            ("c", 60, &["msg c"]),
        ]);

        h.scheduler.tick(minutes(1)).await;
        assert_eq!(h.sink.sent(), vec!["msg a"]);

        let due = h.store.due_entries(minutes(10));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].group_id, "b");
        assert_eq!(due[0].scheduled_ms, minutes(2));
        assert_eq!(due[1].group_id, "c");
        assert_eq!(due[1].scheduled_ms, minutes(3));

        h.scheduler.tick(minutes(2)).await;
        h.scheduler.tick(minutes(3)).await;
        assert_eq!(h.sink.sent(), vec!["msg a", "msg b", "msg c"]);
    }

    #[tokio::test]
    async fn groups_without_messages_are_never_due() {
        let mut h = harness(&[("hollow", 1, &[])]);

        for minute in 1..=5 {
            h.scheduler.tick(minutes(minute)).await;
        }
        assert!(h.sink.sent().is_empty());
    }
}
