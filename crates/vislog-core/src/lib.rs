//! vislog-core: the recording engine behind vislog.
//!
//! A `RecordingStream` turns typed log calls into self-describing Arrow
//! messages and fans each one out to a set of sinks (file, byte stream,
//! memory, TCP viewer). Local mistakes such as a malformed path are returned
//! to the caller; transport failures are isolated per sink and reported to an
//! error observer.

pub mod codec;
pub mod component;
pub mod config;
pub mod entity_path;
pub mod error;
pub mod log_layer;
pub mod recording;
pub mod replay;
pub mod sink;
pub mod time;

pub use codec::{read_file, serialize, MessageReader, MessageWriter, RecordingIdentity, WireMessage};
pub use component::{
    Archetype, ArchetypeBuilder, AsComponents, ComponentBatch, ComponentDescriptor, ComponentValue,
    ValueTypeTag,
};
pub use config::{Backpressure, ConnectOptions, RecordingConfig, SpawnOptions, TargetAddress, UnavailablePolicy};
pub use entity_path::{EntityPath, IntoEntityPath};
pub use error::{Result, SinkError, SinkFailure, VislogError};
pub use log_layer::{text_log, TextLogLayer};
pub use recording::{RecordingStream, RecordingStreamBuilder, StreamState};
pub use replay::StaticView;
pub use sink::{ErrorObserver, LogSink};
pub use time::{TimeContext, TimePoint, TimeType, TimeValue};
