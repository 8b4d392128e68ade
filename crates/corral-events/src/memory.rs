use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::{EventError, EventLog, Record};

/// Process-local log with switches for simulating outages.
#[derive(Debug, Clone)]
pub struct InMemoryEventLog {
    streams: Arc<Mutex<HashMap<String, Vec<Record>>>>,
    available: Arc<AtomicBool>,
    failing_appends: Arc<AtomicBool>,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            failing_appends: Arc::new(AtomicBool::new(false)),
        }
    }

    /// When unavailable both `ping` and `append` fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Keeps `ping` healthy while every `append` fails.
    pub fn set_failing_appends(&self, failing: bool) {
        self.failing_appends.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self, stream: &str) -> Vec<Record> {
        self.streams.lock().get(stream).cloned().unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), EventError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EventError::Unavailable("in-memory log switched off".to_string()))
        }
    }
}

impl EventLog for InMemoryEventLog {
    async fn ping(&self) -> Result<(), EventError> {
        self.check_available()
    }

    async fn append(&self, stream: &str, record: &Record, max_len: u64) -> Result<(), EventError> {
        self.check_available()?;
        if self.failing_appends.load(Ordering::SeqCst) {
            return Err(EventError::Append("in-memory append rejected".to_string()));
        }

        let mut streams = self.streams.lock();
        let entries = streams.entry(stream.to_string()).or_default();
        entries.push(record.clone());

        let max_len = max_len as usize;
        if max_len > 0 && entries.len() > max_len {
            let excess = entries.len() - max_len;
            entries.drain(..excess);
        }
        Ok(())
    }
}
