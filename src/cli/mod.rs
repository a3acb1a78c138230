//! CLI commands for Rotocast using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::broadcast::sink_from_settings;
use crate::catalog::{Catalog, MessageGroup};
use crate::config::{self, load_settings, Settings};
use crate::manager::GroupManager;
use crate::scheduler::{run_rotation_daemon, RotationScheduler};
use crate::store::{PoolStore, QueueStore, SqliteStore};

const MESSAGES_PAGE_SIZE: usize = 10;

/// Rotocast - rotating message broadcaster.
#[derive(Parser)]
#[command(name = "rotocast")]
#[command(version = "0.1.0")]
#[command(about = "Broadcast rotating message groups without repeats", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Provision default settings and sample groups
    Setup,

    /// Start the rotation daemon
    Start,

    /// Show groups, pool progress and queue depth
    Status,

    /// Manage message groups
    #[command(subcommand, alias = "g")]
    Group(GroupCommand),

    /// Manage messages within a group
    #[command(subcommand, alias = "m")]
    Message(MessageCommand),

    /// Force-send one message immediately
    Send {
        /// Group id
        group: String,

        /// Message index within the group
        index: usize,
    },

    /// Re-synchronize pools against the group catalog
    Reload,
}

#[derive(Subcommand)]
pub enum GroupCommand {
    /// Create a new group
    Create {
        /// Group id (lowercase letters, digits, '-' and '_')
        id: String,

        /// Display name
        name: String,

        /// Send frequency in minutes
        frequency: u32,

        /// Text prepended to every message
        #[arg(long, default_value = "")]
        prefix: String,

        /// Text appended to every message
        #[arg(long, default_value = "")]
        suffix: String,
    },

    /// Edit group metadata (messages are untouched)
    Edit {
        id: String,
        name: String,
        frequency: u32,

        #[arg(long, default_value = "")]
        prefix: String,

        #[arg(long, default_value = "")]
        suffix: String,
    },

    /// Delete a group and its pool
    Delete { id: String },

    /// List all groups
    List,

    /// Show one group in detail
    Info { id: String },
}

#[derive(Subcommand)]
pub enum MessageCommand {
    /// Append a message to a group
    Add { group: String, text: String },

    /// Replace the text of one message
    Edit {
        group: String,
        index: usize,
        text: String,
    },

    /// Delete one message (later indices shift down)
    Delete { group: String, index: usize },

    /// List a group's messages
    List {
        group: String,

        /// Page number (10 messages per page)
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
}

fn open_store() -> Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(&config::get_db_path()?)?))
}

fn open_manager() -> Result<GroupManager> {
    let catalog = Catalog::open_default()?;
    let store = open_store()?;
    Ok(GroupManager::new(catalog, store))
}

impl Commands {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Setup => run_setup(),
            Command::Start => {
                run_rotation_daemon().await?;
                Ok(())
            }
            Command::Status => run_status(),
            Command::Group(cmd) => run_group(cmd),
            Command::Message(cmd) => run_message(cmd),
            Command::Send { group, index } => run_send(&group, index).await,
            Command::Reload => run_reload(),
        }
    }
}

fn run_setup() -> Result<()> {
    let settings_path = config::get_settings_path()?;
    if settings_path.exists() {
        println!("Settings already exist at {}", settings_path.display());
    } else {
        config::save_settings(&Settings::default())?;
        println!("Wrote default settings to {}", settings_path.display());
    }

    let catalog = Catalog::open_default()?;
    if !catalog.groups()?.is_empty() {
        println!("Group catalog already has entries, leaving it alone");
        return Ok(());
    }

    let manager = open_manager()?;
    manager.create_group(
        "announcements",
        "Announcements",
        5,
        "&a[&lANNOUNCEMENT&r&a]&r ",
        "",
    )?;
    manager.add_message("announcements", "Welcome to our community!")?;
    manager.add_message("announcements", "Don't forget to read the rules!")?;
    manager.add_message("announcements", "Join our Discord for updates!")?;

    manager.create_group("tips", "Tips", 10, "&e[&lTIP&r&e]&r ", "")?;
    manager.add_message("tips", "Rotated messages never repeat within a cycle.")?;
    manager.add_message("tips", "Run 'rotocast status' to inspect rotation progress.")?;
    manager.add_message("tips", "Edit groups while the daemon runs; changes apply next tick.")?;

    println!("Created sample groups 'announcements' and 'tips'");
    println!("Run 'rotocast start' to begin broadcasting");
    Ok(())
}

fn run_status() -> Result<()> {
    let store = open_store()?;
    let manager = GroupManager::new(Catalog::open_default()?, store.clone());
    let groups = manager.groups()?;

    if groups.is_empty() {
        println!("No message groups configured. Run 'rotocast setup' or 'rotocast group create'.");
        return Ok(());
    }

    println!("Groups:");
    for group in groups.values() {
        let available = store.available_indices(&group.id).len();
        println!(
            "  {} ({}) - {} messages, every {} min, {} unsent this cycle",
            group.id,
            group.name,
            group.message_count(),
            group.frequency,
            available
        );
    }
    println!("Queued deferred broadcasts: {}", store.queue_len());
    Ok(())
}

fn run_group(cmd: GroupCommand) -> Result<()> {
    let manager = open_manager()?;
    match cmd {
        GroupCommand::Create {
            id,
            name,
            frequency,
            prefix,
            suffix,
        } => {
            manager.create_group(&id, &name, frequency, &prefix, &suffix)?;
            println!("Created group '{}'", id);
        }
        GroupCommand::Edit {
            id,
            name,
            frequency,
            prefix,
            suffix,
        } => {
            manager.update_group(&id, &name, frequency, &prefix, &suffix)?;
            println!("Updated group '{}'", id);
        }
        GroupCommand::Delete { id } => {
            manager.delete_group(&id)?;
            println!("Deleted group '{}'", id);
        }
        GroupCommand::List => {
            let groups = manager.groups()?;
            if groups.is_empty() {
                println!("No message groups configured.");
            }
            for group in groups.values() {
                println!(
                    "  {} ({}) - {} messages, every {} min",
                    group.id,
                    group.name,
                    group.message_count(),
                    group.frequency
                );
            }
        }
        GroupCommand::Info { id } => {
            let group = manager.group(&id)?;
            print_group_info(&group);
        }
    }
    Ok(())
}

fn print_group_info(group: &MessageGroup) {
    println!("Group:     {}", group.id);
    println!("Name:      {}", group.name);
    println!("Frequency: every {} min", group.frequency);
    println!("Prefix:    {:?}", group.prefix);
    println!("Suffix:    {:?}", group.suffix);
    println!("Messages:  {}", group.message_count());
    for (i, message) in group.messages.iter().enumerate() {
        println!("  [{}] {}", i, message);
    }
}

fn run_message(cmd: MessageCommand) -> Result<()> {
    let manager = open_manager()?;
    match cmd {
        MessageCommand::Add { group, text } => {
            let index = manager.add_message(&group, &text)?;
            println!("Added message [{}] to '{}'", index, group);
        }
        MessageCommand::Edit { group, index, text } => {
            manager.update_message(&group, index, &text)?;
            println!("Updated message [{}] in '{}'", index, group);
        }
        MessageCommand::Delete { group, index } => {
            manager.delete_message(&group, index)?;
            println!("Deleted message [{}] from '{}'", index, group);
        }
        MessageCommand::List { group, page } => {
            let total = manager.total_pages(&group, MESSAGES_PAGE_SIZE)?;
            let messages = manager.messages_page(&group, page, MESSAGES_PAGE_SIZE)?;
            if messages.is_empty() {
                println!("No messages on page {} of '{}'", page, group);
                return Ok(());
            }
            println!("Messages in '{}' (page {}/{}):", group, page, total.max(1));
            for (index, text) in messages {
                println!("  [{}] {}", index, text);
            }
        }
    }
    Ok(())
}

async fn run_send(group: &str, index: usize) -> Result<()> {
    let settings = load_settings()?;
    let catalog = Catalog::open_default()?;
    let store = open_store()?;
    let sink = sink_from_settings(&settings)?;

    let mut scheduler = RotationScheduler::new(catalog, store.clone(), store, sink);
    scheduler.force_send(group, index).await?;
    println!("Sent message [{}] from '{}'", index, group);
    Ok(())
}

fn run_reload() -> Result<()> {
    let catalog = Catalog::open_default()?;
    let store = open_store()?;
    let sink = Arc::new(crate::broadcast::ConsoleSink);

    let mut scheduler = RotationScheduler::new(catalog, store.clone(), store, sink);
    scheduler.reload()?;
    println!("Pools re-synchronized against the catalog");
    Ok(())
}
