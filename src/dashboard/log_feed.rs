use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::models::LogEntry;
use crate::services::LogSink;

pub const LOG_HISTORY_LIMIT: usize = 100;
const STREAM_CAPACITY: usize = 256;

/// Dashboard side of the logger: keeps the latest records for `/api/logs`
/// and fans new ones out to SSE clients.
pub struct LogFeed {
    history: Mutex<VecDeque<LogEntry>>,
    sender: broadcast::Sender<LogEntry>,
}

impl LogFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            history: Mutex::new(VecDeque::with_capacity(LOG_HISTORY_LIMIT)),
            sender,
        }
    }

    /// Creates a feed and installs it as the sink's subscriber.
    pub fn attach(logger: &LogSink) -> Arc<Self> {
        let feed = Arc::new(Self::new());
        let subscriber = Arc::clone(&feed);
        logger.subscribe(move |entry| subscriber.push(entry));
        feed
    }

    pub fn push(&self, entry: LogEntry) {
        {
            let mut history = self.history.lock();
            if history.len() == LOG_HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(entry.clone());
        }
        // No receivers just means no dashboard is open.
        let _ = self.sender.send(entry);
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<LogEntry> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new()
    }
}
