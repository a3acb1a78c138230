//! Broadcast sinks - where rotated messages actually go.

pub mod format;

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;

use crate::config::Settings;
use crate::error::{Error, Result};

/// Destination for rotated broadcasts.
///
/// `broadcast` is fire-and-forget: delivery failures are logged by the sink,
/// never surfaced to the scheduler. `audience_empty` implements the
/// skip-condition probe consulted once per tick.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    async fn broadcast(&self, text: &str);

    fn audience_empty(&self) -> bool;
}

/// Writes broadcasts to stdout with ANSI color rendering.
pub struct ConsoleSink;

#[async_trait]
impl BroadcastSink for ConsoleSink {
    async fn broadcast(&self, text: &str) {
        println!("{}", format::to_ansi(text));
    }

    fn audience_empty(&self) -> bool {
        // The terminal is always listening.
        false
    }
}

/// Sends broadcasts to a fixed set of Telegram chats.
pub struct TelegramSink {
    bot: Bot,
    chat_ids: Vec<i64>,
}

impl TelegramSink {
    pub fn new(token: &str, chat_ids: Vec<i64>) -> Self {
        Self {
            bot: Bot::new(token),
            chat_ids,
        }
    }
}

#[async_trait]
impl BroadcastSink for TelegramSink {
    async fn broadcast(&self, text: &str) {
        let plain = format::strip_codes(text);
        for chat_id in &self.chat_ids {
            if let Err(e) = self.bot.send_message(ChatId(*chat_id), plain.clone()).await {
                tracing::warn!("Telegram broadcast to {} failed: {}", chat_id, e);
            }
        }
    }

    fn audience_empty(&self) -> bool {
        self.chat_ids.is_empty()
    }
}

/// Fans a broadcast out to every enabled channel. The audience is empty only
/// when every channel's audience is.
pub struct MultiSink {
    sinks: Vec<Arc<dyn BroadcastSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn BroadcastSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl BroadcastSink for MultiSink {
    async fn broadcast(&self, text: &str) {
        for sink in &self.sinks {
            sink.broadcast(text).await;
        }
    }

    fn audience_empty(&self) -> bool {
        self.sinks.iter().all(|s| s.audience_empty())
    }
}

/// Build the sink described by settings.channels.
pub fn sink_from_settings(settings: &Settings) -> Result<Arc<dyn BroadcastSink>> {
    let mut sinks: Vec<Arc<dyn BroadcastSink>> = Vec::new();

    for channel in &settings.channels.enabled {
        match channel.as_str() {
            "console" => sinks.push(Arc::new(ConsoleSink)),
            "telegram" => {
                let token = settings
                    .channels
                    .telegram
                    .bot_token
                    .as_deref()
                    .ok_or_else(|| {
                        Error::Broadcast("telegram channel enabled without bot_token".to_string())
                    })?;
                sinks.push(Arc::new(TelegramSink::new(
                    token,
                    settings.channels.telegram.chat_ids.clone(),
                )));
            }
            other => {
                return Err(Error::Broadcast(format!("unknown channel '{}'", other)));
            }
        }
    }

    if sinks.is_empty() {
        return Err(Error::Broadcast("no broadcast channels enabled".to_string()));
    }

    if sinks.len() == 1 {
        Ok(sinks.remove(0))
    } else {
        Ok(Arc::new(MultiSink::new(sinks)))
    }
}
