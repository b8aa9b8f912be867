//! In-memory sink.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::LogSink;
use crate::codec::{MessageWriter, WireMessage};
use crate::error::SinkError;

/// Shared handle to the messages collected by a [`MemorySink`].
#[derive(Clone, Default)]
pub struct MemorySinkStorage {
    messages: Arc<Mutex<Vec<Arc<WireMessage>>>>,
    closed: Arc<AtomicBool>,
}

impl MemorySinkStorage {
    /// Copy of everything collected so far.
    pub fn messages(&self) -> Vec<Arc<WireMessage>> {
        self.lock().clone()
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<Arc<WireMessage>> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether the owning sink has received its close signal.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write the collected messages as a complete framed stream.
    pub fn write_to(&self, writer: impl Write) -> std::io::Result<()> {
        let mut out = MessageWriter::new(writer)?;
        for msg in self.lock().iter() {
            out.append(msg)?;
        }
        out.finish()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<WireMessage>>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps every message in memory.
#[derive(Default)]
pub struct MemorySink {
    storage: MemorySinkStorage,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(&self) -> MemorySinkStorage {
        self.storage.clone()
    }
}

impl LogSink for MemorySink {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn send(&self, msg: Arc<WireMessage>) -> Result<(), SinkError> {
        if self.storage.is_closed() {
            return Err(SinkError::Closed);
        }
        self.storage.lock().push(msg);
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        self.storage.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
