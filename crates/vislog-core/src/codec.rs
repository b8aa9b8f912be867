//! Wire messages and their encoding.
//!
//! [`serialize`] turns one log call into an immutable [`WireMessage`]. The
//! message is encoded once, as an Arrow IPC stream holding a single one-row
//! record batch:
//!
//! ```text
//! schema metadata  vislog.header      = {version, ids, entity_path, is_static, timepoint}
//! column i         List<T>, 1 row     = the N instances of component i
//! field metadata   vislog.descriptor  = {archetype, component, component_type}
//! ```
//!
//! A cleared component is a present column with an empty row; an absent
//! component has no column at all.
//!
//! Streams of messages (files, pipes, TCP) are framed as
//!
//! ```text
//! | magic (8 bytes) | len (u64 LE) | payload | ... | 0u64 (end of stream) |
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, ListArray};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use serde::{Deserialize, Serialize};

use crate::component::{ComponentBatch, ComponentDescriptor};
use crate::entity_path::EntityPath;
use crate::error::{Result, VislogError};
use crate::time::TimePoint;

pub const FORMAT_VERSION: u32 = 1;

/// Leading bytes of every framed stream.
pub const STREAM_MAGIC: [u8; 8] = *b"VISLOG\x00\x01";

const HEADER_KEY: &str = "vislog.header";
const DESCRIPTOR_KEY: &str = "vislog.descriptor";

/// Which recording a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordingIdentity {
    pub application_id: String,
    pub recording_id: String,
}

impl RecordingIdentity {
    pub fn new(application_id: impl Into<String>, recording_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            recording_id: recording_id.into(),
        }
    }

    /// A fresh recording of `application_id` with a random id.
    pub fn generate(application_id: impl Into<String>) -> Self {
        Self::new(application_id, uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Serialize, Deserialize)]
struct MessageHeader {
    version: u32,
    application_id: String,
    recording_id: String,
    entity_path: EntityPath,
    is_static: bool,
    timepoint: Option<TimePoint>,
}

/// The immutable unit handed to every sink.
#[derive(Debug, Clone)]
pub struct WireMessage {
    recording: RecordingIdentity,
    entity_path: EntityPath,
    is_static: bool,
    timepoint: Option<TimePoint>,
    batches: Vec<ComponentBatch>,
    encoded: Arc<[u8]>,
}

impl WireMessage {
    pub fn recording(&self) -> &RecordingIdentity {
        &self.recording
    }

    pub fn entity_path(&self) -> &EntityPath {
        &self.entity_path
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// `None` for static messages.
    pub fn timepoint(&self) -> Option<&TimePoint> {
        self.timepoint.as_ref()
    }

    /// Component batches, ordered by descriptor.
    pub fn batches(&self) -> &[ComponentBatch] {
        &self.batches
    }

    pub fn component(&self, descriptor: &ComponentDescriptor) -> Option<&ComponentBatch> {
        self.batches.iter().find(|b| b.descriptor() == descriptor)
    }

    /// First batch whose component name is `component`, whatever its archetype.
    pub fn component_named(&self, component: &str) -> Option<&ComponentBatch> {
        self.batches
            .iter()
            .find(|b| b.descriptor().component == component)
    }

    /// The encoded IPC payload (without framing).
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Decode one unframed payload produced by [`serialize`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = StreamReader::try_new(Cursor::new(bytes), None)?;
        let schema = reader.schema();

        let header_json = schema
            .metadata()
            .get(HEADER_KEY)
            .ok_or_else(|| VislogError::Decode("missing message header".to_string()))?;
        let header: MessageHeader = serde_json::from_str(header_json)?;
        if header.version != FORMAT_VERSION {
            return Err(VislogError::Decode(format!(
                "unsupported format version {}",
                header.version
            )));
        }

        let record = reader
            .next()
            .ok_or_else(|| VislogError::Decode("message has no record batch".to_string()))??;
        if record.num_rows() != 1 {
            return Err(VislogError::Decode(format!(
                "expected exactly one row, found {}",
                record.num_rows()
            )));
        }

        let mut batches = Vec::with_capacity(record.num_columns());
        for (field, column) in schema.fields().iter().zip(record.columns()) {
            let descriptor_json = field.metadata().get(DESCRIPTOR_KEY).ok_or_else(|| {
                VislogError::Decode(format!("column '{}' has no descriptor", field.name()))
            })?;
            let descriptor: ComponentDescriptor = serde_json::from_str(descriptor_json)?;
            let list = column.as_list_opt::<i32>().ok_or_else(|| {
                VislogError::Decode(format!("column '{}' is not a list", field.name()))
            })?;
            batches.push(ComponentBatch::try_new(descriptor, list.value(0))?);
        }

        Ok(Self {
            recording: RecordingIdentity::new(header.application_id, header.recording_id),
            entity_path: header.entity_path,
            is_static: header.is_static,
            timepoint: header.timepoint,
            batches,
            encoded: Arc::from(bytes),
        })
    }
}

impl PartialEq for WireMessage {
    fn eq(&self, other: &Self) -> bool {
        self.recording == other.recording
            && self.entity_path == other.entity_path
            && self.is_static == other.is_static
            && self.timepoint == other.timepoint
            && self.batches == other.batches
    }
}

/// Build a wire message from one log call.
///
/// Batches are sorted by descriptor so the encoding does not depend on the
/// order the caller supplied them in. Fails only on broken invariants: a
/// static message with a time point, two batches for the same field, or a
/// batch whose array does not match its declared type.
pub fn serialize(
    entity_path: &EntityPath,
    is_static: bool,
    timepoint: Option<TimePoint>,
    mut batches: Vec<ComponentBatch>,
    recording: &RecordingIdentity,
) -> Result<WireMessage> {
    if is_static && timepoint.is_some() {
        return Err(VislogError::Serialization(
            "a static message cannot carry a time point".to_string(),
        ));
    }

    batches.sort_by(|a, b| a.descriptor().cmp(b.descriptor()));
    for pair in batches.windows(2) {
        let (a, b) = (pair[0].descriptor(), pair[1].descriptor());
        if a.archetype == b.archetype && a.component == b.component {
            return Err(VislogError::Serialization(format!(
                "component '{a}' appears more than once"
            )));
        }
    }
    for batch in &batches {
        let declared = batch.descriptor().component_type;
        if batch.array().data_type() != &declared.data_type() {
            return Err(VislogError::Serialization(format!(
                "component '{}' has unsupported type {} (declared {declared})",
                batch.descriptor(),
                batch.array().data_type()
            )));
        }
    }

    let header = MessageHeader {
        version: FORMAT_VERSION,
        application_id: recording.application_id.clone(),
        recording_id: recording.recording_id.clone(),
        entity_path: entity_path.clone(),
        is_static,
        timepoint,
    };
    let encoded = encode_ipc(&header, &batches)
        .map_err(|e| VislogError::Serialization(e.to_string()))?;

    Ok(WireMessage {
        recording: recording.clone(),
        entity_path: header.entity_path,
        is_static,
        timepoint: header.timepoint,
        batches,
        encoded: Arc::from(encoded),
    })
}

fn encode_ipc(header: &MessageHeader, batches: &[ComponentBatch]) -> Result<Vec<u8>> {
    let mut fields = Vec::with_capacity(batches.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batches.len());

    for batch in batches {
        let item = Arc::new(Field::new("item", batch.array().data_type().clone(), true));
        let list = ListArray::try_new(
            item.clone(),
            OffsetBuffer::from_lengths([batch.len()]),
            batch.array().clone(),
            None,
        )?;
        let metadata = HashMap::from([(
            DESCRIPTOR_KEY.to_string(),
            serde_json::to_string(batch.descriptor())?,
        )]);
        fields.push(
            Field::new(batch.descriptor().to_string(), DataType::List(item), false)
                .with_metadata(metadata),
        );
        columns.push(Arc::new(list));
    }

    let metadata = HashMap::from([(HEADER_KEY.to_string(), serde_json::to_string(header)?)]);
    let schema = Arc::new(Schema::new_with_metadata(fields, metadata));
    let record = RecordBatch::try_new_with_options(
        schema.clone(),
        columns,
        &RecordBatchOptions::new().with_row_count(Some(1)),
    )?;

    let mut writer = StreamWriter::try_new(Vec::new(), &schema)?;
    writer.write(&record)?;
    writer.finish()?;
    Ok(writer.into_inner()?)
}

// ─── Framing ──────────────────────────────────────────────────────────────────

/// Length-prefixed frame of one message, as written by [`MessageWriter`].
pub fn encode_frame(msg: &WireMessage) -> Vec<u8> {
    let payload = msg.encoded();
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// The frame that terminates a stream.
pub const END_OF_STREAM: [u8; 8] = 0u64.to_le_bytes();

/// Frames larger than this are treated as a corrupt stream.
pub const MAX_FRAME_BYTES: u64 = 1 << 30;

/// Check a frame length read off the wire before anything is allocated.
pub fn check_frame_len(len: u64) -> Result<usize> {
    if len > MAX_FRAME_BYTES {
        return Err(VislogError::Decode(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }
    usize::try_from(len)
        .map_err(|_| VislogError::Decode(format!("frame of {len} bytes is too large")))
}

/// The error for a payload that ended after `read` of `expected` bytes.
pub fn truncated_frame(read: usize, expected: usize) -> VislogError {
    VislogError::Decode(format!("truncated frame: {read} of {expected} bytes"))
}

/// Writes a framed stream of messages to any `Write`.
pub struct MessageWriter<W: Write> {
    inner: W,
    finished: bool,
}

impl<W: Write> MessageWriter<W> {
    /// Write the stream magic and return the writer.
    pub fn new(mut inner: W) -> io::Result<Self> {
        inner.write_all(&STREAM_MAGIC)?;
        Ok(Self {
            inner,
            finished: false,
        })
    }

    pub fn append(&mut self, msg: &WireMessage) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "message stream already finished",
            ));
        }
        self.inner.write_all(&encode_frame(msg))
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Write the end-of-stream marker and flush. Idempotent.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.finished {
            self.inner.write_all(&END_OF_STREAM)?;
            self.finished = true;
        }
        self.inner.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads a framed stream of messages from any `Read`.
///
/// Iteration ends at the end-of-stream marker or at a clean EOF between
/// frames; a partial frame is an error.
pub struct MessageReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> MessageReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let mut magic = [0u8; 8];
        inner.read_exact(&mut magic).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => VislogError::Decode("stream too short".to_string()),
            _ => VislogError::Io(e),
        })?;
        if magic != STREAM_MAGIC {
            return Err(VislogError::Decode("not a vislog stream (bad magic)".to_string()));
        }
        Ok(Self { inner, done: false })
    }

    fn read_frame_len(&mut self) -> Result<Option<u64>> {
        let mut buf = [0u8; 8];
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => Ok(None),
            8 => Ok(Some(u64::from_le_bytes(buf))),
            _ => Err(VislogError::Decode("truncated frame header".to_string())),
        }
    }

    fn read_next(&mut self) -> Result<Option<WireMessage>> {
        let len = match self.read_frame_len()? {
            None | Some(0) => return Ok(None),
            Some(len) => len,
        };
        let len = check_frame_len(len)?;
        // Grows with what actually arrives, not with the claimed length.
        let mut payload = Vec::new();
        (&mut self.inner).take(len as u64).read_to_end(&mut payload)?;
        if payload.len() < len {
            return Err(truncated_frame(payload.len(), len));
        }
        WireMessage::decode(&payload).map(Some)
    }
}

impl<R: Read> Iterator for MessageReader<R> {
    type Item = Result<WireMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read every message of a file artifact, in order.
pub fn read_file(path: &Path) -> Result<Vec<WireMessage>> {
    let file = io::BufReader::new(fs::File::open(path)?);
    MessageReader::new(file)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ArchetypeBuilder, ValueTypeTag};
    use crate::time::TimeValue;

    fn identity() -> RecordingIdentity {
        RecordingIdentity::new("test_app", "rec-1")
    }

    fn points() -> Vec<ComponentBatch> {
        ArchetypeBuilder::new("Points3D")
            .with("positions", vec![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]])
            .with("colors", vec![0xff0000ffu32, 0x00ff00ff])
            .build()
            .batches()
            .to_vec()
    }

    #[test]
    fn test_serialize_sorts_batches() {
        let path = EntityPath::parse("a/b").unwrap();
        let msg = serialize(&path, false, Some(TimePoint::default()), points(), &identity()).unwrap();
        let names: Vec<_> = msg
            .batches()
            .iter()
            .map(|b| b.descriptor().component.as_str())
            .collect();
        assert_eq!(names, ["colors", "positions"]);
    }

    #[test]
    fn test_encoding_is_order_independent() {
        let path = EntityPath::parse("a").unwrap();
        let mut reversed = points();
        reversed.reverse();
        let a = serialize(&path, true, None, points(), &identity()).unwrap();
        let b = serialize(&path, true, None, reversed, &identity()).unwrap();
        assert_eq!(a.encoded(), b.encoded());
    }

    #[test]
    fn test_decode_roundtrip() {
        let path = EntityPath::from_parts(["world", "cam/left"]);
        let tp: TimePoint = [("frame", TimeValue::Sequence(5))].into_iter().collect();
        let msg = serialize(&path, false, Some(tp), points(), &identity()).unwrap();

        let decoded = WireMessage::decode(msg.encoded()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.entity_path().parts(), ["world", "cam/left"]);
        assert_eq!(
            decoded.timepoint().unwrap().get("frame"),
            Some(&TimeValue::Sequence(5))
        );
    }

    #[test]
    fn test_empty_batch_differs_from_absent() {
        let path = EntityPath::parse("a").unwrap();
        let cleared = ComponentBatch::cleared(ComponentDescriptor::new("colors", ValueTypeTag::UInt32));
        let with_clear = serialize(&path, true, None, vec![cleared], &identity()).unwrap();
        let without = serialize(&path, true, None, vec![], &identity()).unwrap();

        let decoded = WireMessage::decode(with_clear.encoded()).unwrap();
        let colors = decoded.component_named("colors").unwrap();
        assert!(colors.is_empty());

        let decoded = WireMessage::decode(without.encoded()).unwrap();
        assert!(decoded.component_named("colors").is_none());
        assert_ne!(with_clear.encoded(), without.encoded());
    }

    #[test]
    fn test_static_with_time_is_rejected() {
        let path = EntityPath::parse("a").unwrap();
        let err = serialize(&path, true, Some(TimePoint::default()), vec![], &identity()).unwrap_err();
        assert!(matches!(err, VislogError::Serialization(_)));
    }

    #[test]
    fn test_duplicate_component_is_rejected() {
        let path = EntityPath::parse("a").unwrap();
        let batches = vec![
            ComponentBatch::new("x", vec![1i64]),
            ComponentBatch::new("x", vec![1.0f64]),
        ];
        assert!(serialize(&path, true, None, batches, &identity()).is_err());
    }

    #[test]
    fn test_framed_stream_roundtrip() {
        let path = EntityPath::parse("a").unwrap();
        let mut writer = MessageWriter::new(Vec::new()).unwrap();
        for i in 0..3i64 {
            let batch = ComponentBatch::new("value", vec![i]);
            let msg = serialize(&path, true, None, vec![batch], &identity()).unwrap();
            writer.append(&msg).unwrap();
        }
        writer.finish().unwrap();
        let bytes = writer.into_inner();

        let messages: Vec<_> = MessageReader::new(Cursor::new(bytes))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(messages.len(), 3);
        for (i, msg) in messages.iter().enumerate() {
            let value = msg.component_named("value").unwrap();
            assert_eq!(value.display_values(4), format!("[{i}]"));
        }
    }

    #[test]
    fn test_reader_accepts_missing_end_marker() {
        let path = EntityPath::parse("a").unwrap();
        let msg = serialize(&path, true, None, vec![], &identity()).unwrap();
        let mut writer = MessageWriter::new(Vec::new()).unwrap();
        writer.append(&msg).unwrap();
        let bytes = writer.into_inner();

        let count = MessageReader::new(Cursor::new(bytes)).unwrap().count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reader_rejects_truncated_frame() {
        let path = EntityPath::parse("a").unwrap();
        let msg = serialize(&path, true, None, vec![], &identity()).unwrap();
        let mut writer = MessageWriter::new(Vec::new()).unwrap();
        writer.append(&msg).unwrap();
        let mut bytes = writer.into_inner();
        bytes.truncate(bytes.len() - 3);

        let results: Vec<_> = MessageReader::new(Cursor::new(bytes)).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(VislogError::Decode(_))));
    }

    #[test]
    fn test_reader_rejects_oversized_frame_length() {
        for len in [u64::MAX, 1 << 62, MAX_FRAME_BYTES + 1] {
            let mut bytes = STREAM_MAGIC.to_vec();
            bytes.extend_from_slice(&len.to_le_bytes());
            let results: Vec<_> = MessageReader::new(Cursor::new(bytes)).unwrap().collect();
            assert_eq!(results.len(), 1);
            assert!(matches!(results[0], Err(VislogError::Decode(_))));
        }
    }

    #[test]
    fn test_reader_rejects_frame_longer_than_input() {
        let mut bytes = STREAM_MAGIC.to_vec();
        bytes.extend_from_slice(&MAX_FRAME_BYTES.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        let result = MessageReader::new(Cursor::new(bytes)).unwrap().next().unwrap();
        assert!(matches!(result, Err(VislogError::Decode(msg)) if msg.contains("16 of")));
    }

    #[test]
    fn test_reader_rejects_bad_magic() {
        assert!(MessageReader::new(Cursor::new(b"NOTVISLOG".to_vec())).is_err());
    }
}
