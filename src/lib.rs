//! Rotocast library root.

pub mod broadcast;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod scheduler;
pub mod store;

pub use broadcast::{BroadcastSink, ConsoleSink, MultiSink, TelegramSink};
pub use catalog::{Catalog, MessageGroup};
pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use error::{Error, Result};
pub use manager::GroupManager;
pub use scheduler::{run_rotation_daemon, RotationDaemon, RotationScheduler};
pub use store::{MemoryStore, PoolStore, QueueEntry, QueueStore, SqliteStore};
