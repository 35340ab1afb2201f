use chrono::Utc;
use parking_lot::RwLock;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

use crate::models::{LogEntry, LogLevel};

pub type LogCallback = Arc<dyn Fn(LogEntry) + Send + Sync>;

/// Single-subscriber log sink shared by the bot, the pipeline and the dashboard.
///
/// Every record is echoed to the `log` facade. At most one subscriber receives
/// records; subscribing again replaces it.
#[derive(Clone, Default)]
pub struct LogSink {
    subscriber: Arc<RwLock<Option<LogCallback>>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(LogEntry) + Send + Sync + 'static,
    {
        *self.subscriber.write() = Some(Arc::new(callback));
    }

    pub fn unsubscribe(&self) {
        *self.subscriber.write() = None;
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            id: short_id(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };

        match level {
            LogLevel::Error => log::error!("[Logger] {}: {}", level, entry.message),
            LogLevel::Warn => log::warn!("[Logger] {}: {}", level, entry.message),
            LogLevel::Info | LogLevel::Success => {
                log::info!("[Logger] {}: {}", level, entry.message)
            }
        }

        // Snapshot the subscriber so the callback never runs under the lock.
        let subscriber = self.subscriber.read().clone();
        if let Some(callback) = subscriber {
            callback(entry.clone());
        }

        entry
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }
}

fn short_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}
