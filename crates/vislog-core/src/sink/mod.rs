//! Transport sinks.
//!
//! Every sink receives the same `Arc<WireMessage>` from a recording stream and
//! delivers it somewhere. Sinks are independent: a failing sink reports
//! through the [`ErrorObserver`] and never affects its siblings.
//!
//! - **FileSink**: framed append to a local file, replayable after close
//! - **ByteStreamSink**: framed passthrough to an already-open writer
//! - **MemorySink**: in-process buffer, mostly for tests and deferred saving
//! - **ConnectSink**: bounded queue drained over TCP by a background worker
//! - **spawn_and_connect**: launch a companion viewer, then connect to it

pub mod connect;
pub mod file;
pub mod memory;
pub mod spawn;
pub mod stream;

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use tracing::error;

use crate::codec::{MessageWriter, WireMessage};
use crate::error::{SinkError, SinkFailure};

pub use connect::{ConnectSink, ConnectStats};
pub use file::FileSink;
pub use memory::{MemorySink, MemorySinkStorage};
pub use spawn::{spawn, spawn_and_connect};
pub use stream::ByteStreamSink;

/// The capability set shared by every transport.
pub trait LogSink: Send + Sync + 'static {
    /// Human-readable identity used in failure reports.
    fn name(&self) -> String;

    fn send(&self, msg: Arc<WireMessage>) -> Result<(), SinkError>;

    /// Block until everything accepted so far has been handed to the transport.
    fn flush(&self) -> Result<(), SinkError>;

    /// Stop accepting messages and wake any `send` waiting for queue space,
    /// which then fails with [`SinkError::Closed`]. Must not block. Followed
    /// by [`close`](Self::close).
    fn begin_close(&self) {}

    /// Flush, finalize framing and release the transport. Idempotent.
    fn close(&self) -> Result<(), SinkError>;

    /// Hook for sinks that fail asynchronously, called when the sink is
    /// installed on a stream.
    fn attach_observer(&self, _observer: &ErrorObserver) {}
}

/// Receives sink failures that happen outside the caller's control flow.
#[derive(Clone)]
pub struct ErrorObserver {
    callback: Arc<dyn Fn(&SinkFailure) + Send + Sync>,
}

impl ErrorObserver {
    pub fn new(callback: impl Fn(&SinkFailure) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Log every failure with `tracing::error!`.
    pub fn tracing() -> Self {
        Self::new(|failure| {
            error!(sink = %failure.sink, error = %failure.error, "Sink failure");
        })
    }

    pub fn report(&self, sink: impl Into<String>, error: SinkError) {
        let failure = SinkFailure {
            sink: sink.into(),
            error,
        };
        (self.callback)(&failure);
    }
}

impl Default for ErrorObserver {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for ErrorObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorObserver")
    }
}

/// State of a synchronous framed writer. A failed write is terminal.
pub(crate) enum WriterState<W: Write> {
    Open(MessageWriter<W>),
    Failed(String),
    Closed,
}

impl<W: Write> WriterState<W> {
    pub(crate) fn open(writer: W) -> Result<Self, SinkError> {
        Ok(WriterState::Open(MessageWriter::new(writer)?))
    }

    pub(crate) fn append(&mut self, msg: &WireMessage) -> Result<(), SinkError> {
        match self {
            WriterState::Open(writer) => {
                if let Err(e) = writer.append(msg) {
                    return Err(self.fail(e));
                }
                Ok(())
            }
            WriterState::Failed(reason) => Err(SinkError::Failed(reason.clone())),
            WriterState::Closed => Err(SinkError::Closed),
        }
    }

    pub(crate) fn flush(&mut self) -> Result<(), SinkError> {
        match self {
            WriterState::Open(writer) => {
                if let Err(e) = writer.flush() {
                    return Err(self.fail(e));
                }
                Ok(())
            }
            WriterState::Failed(reason) => Err(SinkError::Failed(reason.clone())),
            WriterState::Closed => Ok(()),
        }
    }

    pub(crate) fn close(&mut self) -> Result<(), SinkError> {
        let result = match self {
            WriterState::Open(writer) => writer.finish().map_err(SinkError::from),
            WriterState::Failed(_) | WriterState::Closed => Ok(()),
        };
        *self = WriterState::Closed;
        result
    }

    fn fail(&mut self, e: std::io::Error) -> SinkError {
        *self = WriterState::Failed(e.to_string());
        SinkError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use super::*;
    use crate::codec::{serialize, RecordingIdentity};
    use crate::entity_path::EntityPath;

    /// Accepts `budget` bytes, then fails every write.
    struct FailAfter {
        budget: usize,
    }

    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn message() -> WireMessage {
        serialize(
            &EntityPath::root(),
            true,
            None,
            vec![],
            &RecordingIdentity::new("app", "rec"),
        )
        .unwrap()
    }

    #[test]
    fn test_failed_write_is_terminal() {
        let msg = message();
        let mut state = WriterState::open(FailAfter { budget: 8 }).unwrap();

        assert!(matches!(state.append(&msg), Err(SinkError::Io(_))));
        assert!(matches!(state.append(&msg), Err(SinkError::Failed(_))));
        assert!(matches!(state.flush(), Err(SinkError::Failed(_))));
        assert!(state.close().is_ok());
        assert!(matches!(state.append(&msg), Err(SinkError::Closed)));
    }

    #[test]
    fn test_open_fails_when_magic_cannot_be_written() {
        assert!(WriterState::open(FailAfter { budget: 0 }).is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut state = WriterState::open(Vec::new()).unwrap();
        state.append(&message()).unwrap();
        assert!(state.close().is_ok());
        assert!(state.close().is_ok());
        assert!(state.flush().is_ok());
    }

    #[test]
    fn test_observer_receives_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let observer = ErrorObserver::new(move |f| {
            seen_clone.lock().unwrap().push(f.to_string());
        });
        observer.report("file:/tmp/x", SinkError::Closed);
        assert_eq!(seen.lock().unwrap().as_slice(), ["[file:/tmp/x] Sink is closed"]);
    }
}
