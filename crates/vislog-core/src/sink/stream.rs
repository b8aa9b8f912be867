//! Byte-stream passthrough sink.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use super::{LogSink, WriterState};
use crate::codec::WireMessage;
use crate::error::SinkError;

type BoxedWriter = Box<dyn Write + Send>;

/// Writes framed messages straight into an already-open writer, e.g. stdout
/// piped into another process. No buffering is added on top of the writer.
pub struct ByteStreamSink {
    name: String,
    state: Mutex<WriterState<BoxedWriter>>,
}

impl ByteStreamSink {
    /// Writes the stream magic immediately.
    pub fn new(name: impl Into<String>, writer: impl Write + Send + 'static) -> Result<Self, SinkError> {
        let writer: BoxedWriter = Box::new(writer);
        Ok(Self {
            name: name.into(),
            state: Mutex::new(WriterState::open(writer)?),
        })
    }

    pub fn stdout() -> Result<Self, SinkError> {
        Self::new("stdout", io::stdout())
    }
}

impl LogSink for ByteStreamSink {
    fn name(&self) -> String {
        format!("stream:{}", self.name)
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
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::{serialize, MessageReader, RecordingIdentity};
    use crate::component::ComponentBatch;
    use crate::entity_path::EntityPath;

    /// A writer whose bytes stay observable after the sink takes ownership.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_passthrough_preserves_order() {
        let buf = SharedBuf::default();
        let sink = ByteStreamSink::new("pipe", buf.clone()).unwrap();
        let path = EntityPath::parse("log").unwrap();
        let identity = RecordingIdentity::new("app", "rec");

        for text in ["first", "second", "third"] {
            let batch = ComponentBatch::new("text", vec![text]);
            let msg = serialize(&path, false, Some(Default::default()), vec![batch], &identity).unwrap();
            sink.send(Arc::new(msg)).unwrap();
        }

        // Unbuffered: every message is already in the writer before close.
        let before_close = buf.0.lock().unwrap().clone();
        assert_eq!(MessageReader::new(Cursor::new(before_close)).unwrap().count(), 3);

        sink.close().unwrap();
        let bytes = buf.0.lock().unwrap().clone();
        let texts: Vec<String> = MessageReader::new(Cursor::new(bytes))
            .unwrap()
            .map(|m| m.unwrap().component_named("text").unwrap().display_values(1))
            .collect();
        assert_eq!(texts, ["[first]", "[second]", "[third]"]);
    }
}
