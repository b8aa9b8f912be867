//! Local file sink.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use super::{LogSink, WriterState};
use crate::codec::WireMessage;
use crate::error::SinkError;

/// Appends framed messages to a file.
///
/// `send` writes synchronously through a buffered writer, so messages land in
/// call order. After `close` the file is a complete, independently replayable
/// artifact. The first failed write is terminal for this instance.
pub struct FileSink {
    path: PathBuf,
    state: Mutex<WriterState<BufWriter<fs::File>>>,
}

impl FileSink {
    /// Create (or truncate) `path`, creating parent directories as needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(&path)?;
        let state = WriterState::open(BufWriter::new(file))?;
        info!(path = %path.display(), "File sink opened");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn send(&self, msg: Arc<WireMessage>) -> Result<(), SinkError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(&msg)
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }

    fn close(&self) -> Result<(), SinkError> {
        let result = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        debug!(path = %self.path.display(), "File sink closed");
        result
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
