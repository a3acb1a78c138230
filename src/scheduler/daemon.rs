//! Rotation daemon - the fixed-period tick loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::MissedTickBehavior;

use crate::broadcast::sink_from_settings;
use crate::catalog::Catalog;
use crate::config::{get_db_path, load_settings};
use crate::error::Error;
use crate::scheduler::RotationScheduler;
use crate::store::SqliteStore;

/// Drives the scheduler with one tick per configured period.
pub struct RotationDaemon {
    scheduler: RotationScheduler,
    tick_period: Duration,
    running: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
}

impl RotationDaemon {
    pub fn new(scheduler: RotationScheduler, tick_seconds: u64) -> Self {
        Self {
            scheduler,
            tick_period: Duration::from_secs(tick_seconds),
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Start the daemon loop. Returns when `stop` is called.
    pub async fn start(&mut self) -> Result<(), Error> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(Error::Other("Daemon already running".to_string()));
            }
            *running = true;
        }

        self.scheduler.initialize()?;
        tracing::info!(
            "Rotation daemon started (tick every {}s)",
            self.tick_period.as_secs()
        );

        let mut interval = tokio::time::interval(self.tick_period);
        // A stalled store call delays the next tick; ticks never overlap or
        // bunch up to replay missed minutes.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.notified() => {}
            }

            if !*self.running.read().await {
                tracing::info!("Rotation daemon stopping");
                break;
            }

            let now_ms = chrono::Utc::now().timestamp_millis();
            self.scheduler.tick(now_ms).await;
        }

        Ok(())
    }

    /// Stop the daemon. The timer wakes immediately, so the loop ends before
    /// the stores are dropped.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        self.shutdown.notify_one();
        tracing::info!("Rotation daemon stop requested");
    }

    fn stop_handle(&self) -> (Arc<RwLock<bool>>, Arc<Notify>) {
        (self.running.clone(), self.shutdown.clone())
    }
}

/// Run the rotation daemon until ctrl-c.
pub async fn run_rotation_daemon() -> Result<(), Error> {
    tracing::info!("Starting rotation daemon...");

    let settings = load_settings()?;
    let catalog = Catalog::open_default()?;
    let store = Arc::new(SqliteStore::open(&get_db_path()?)?);
    let sink = sink_from_settings(&settings)?;

    let scheduler = RotationScheduler::new(catalog, store.clone(), store, sink);
    let mut daemon = RotationDaemon::new(scheduler, settings.scheduler.tick_seconds);

    let (running, shutdown) = daemon.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let mut r = running.write().await;
        *r = false;
        shutdown.notify_one();
    });

    daemon.start().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ConsoleSink;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn stop_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("groups.json"));
        let store = Arc::new(MemoryStore::new());
        let scheduler =
            RotationScheduler::new(catalog, store.clone(), store, Arc::new(ConsoleSink));

        let mut daemon = RotationDaemon::new(scheduler, 3600);
        let (running, shutdown) = daemon.stop_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut r = running.write().await;
            *r = false;
            shutdown.notify_one();
        });

        daemon.start().await.unwrap();
    }
}
