//! Recording streams: the public logging handle.
//!
//! A [`RecordingStream`] owns one recording identity, one [`TimeContext`] and
//! an ordered set of sinks. A log call resolves the entity path, snapshots
//! the active timelines, serializes once and hands the same message to every
//! sink.
//!
//! ```text
//! Unconfigured ──set_sinks──▶ Active ──close / last drop──▶ Closed
//!      ▲                        │
//!      └──── set_sinks([]) ─────┘
//! ```
//!
//! The sink set is copy-on-write. A log call holds the set lock only long
//! enough to pin the current [`Fanout`] and then delivers without it, so a
//! slow sink never stalls `set_sinks` or loggers on other sinks. Replacing
//! the set waits until every call pinned to the old fanout has finished
//! before closing the old sinks, so a removed sink never receives a message
//! after `set_sinks` returns.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::codec::{serialize, RecordingIdentity, WireMessage};
use crate::component::AsComponents;
use crate::config::{RecordingConfig, TargetAddress, UnavailablePolicy};
use crate::entity_path::IntoEntityPath;
use crate::error::{Result, SinkFailure, VislogError};
use crate::sink::{
    spawn_and_connect, ByteStreamSink, ConnectSink, ErrorObserver, FileSink, LogSink, MemorySink,
    MemorySinkStorage,
};
use crate::time::{TimeContext, TimePoint, TimeValue};

/// Built-in timeline holding the wall-clock time of each log call.
pub const LOG_TIME_TIMELINE: &str = "log_time";

/// Built-in timeline counting log calls on one stream.
pub const LOG_TICK_TIMELINE: &str = "log_tick";

/// Lifecycle state of a [`RecordingStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No sinks attached; log calls are dropped.
    Unconfigured,
    Active,
    /// Terminal; log calls fail with [`VislogError::StreamClosed`].
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Unconfigured => "unconfigured",
            StreamState::Active => "active",
            StreamState::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Configures and creates a [`RecordingStream`].
///
/// The configuration is resolved once, when a terminal method (`build`,
/// `save`, `connect`, ...) runs. Without an explicit [`config`](Self::config)
/// the defaults are used, with the enable switch read from the `VISLOG`
/// environment variable.
pub struct RecordingStreamBuilder {
    application_id: String,
    recording_id: Option<String>,
    config: Option<RecordingConfig>,
    enabled: Option<bool>,
    log_time: Option<bool>,
    observer: Option<ErrorObserver>,
}

impl RecordingStreamBuilder {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            recording_id: None,
            config: None,
            enabled: None,
            log_time: None,
            observer: None,
        }
    }

    /// Use a fixed recording id instead of a random one, e.g. to let several
    /// processes contribute to the same recording.
    pub fn recording_id(mut self, recording_id: impl Into<String>) -> Self {
        self.recording_id = Some(recording_id.into());
        self
    }

    pub fn config(mut self, config: RecordingConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the enable switch of the configuration.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Stamp non-static messages with the `log_time` and `log_tick` timelines.
    pub fn log_time(mut self, log_time: bool) -> Self {
        self.log_time = Some(log_time);
        self
    }

    /// Receive sink failures instead of having them logged.
    pub fn on_sink_error(mut self, callback: impl Fn(&SinkFailure) + Send + Sync + 'static) -> Self {
        self.observer = Some(ErrorObserver::new(callback));
        self
    }

    pub fn error_observer(mut self, observer: ErrorObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn resolve_config(&self) -> RecordingConfig {
        let mut config = self.config.clone().unwrap_or_else(RecordingConfig::from_env);
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(log_time) = self.log_time {
            config.log_time = log_time;
        }
        config
    }

    /// A stream with no sinks yet.
    pub fn build(self) -> Result<RecordingStream> {
        let config = self.resolve_config();
        Ok(self.into_stream(config))
    }

    fn into_stream(self, config: RecordingConfig) -> RecordingStream {
        if !config.enabled {
            debug!(application_id = %self.application_id, "Recording disabled");
            return RecordingStream::disabled();
        }
        let identity = match self.recording_id {
            Some(recording_id) => RecordingIdentity::new(self.application_id, recording_id),
            None => RecordingIdentity::generate(self.application_id),
        };
        info!(
            application_id = %identity.application_id,
            recording_id = %identity.recording_id,
            "Recording stream created"
        );
        RecordingStream {
            inner: Some(Arc::new(Inner {
                identity,
                config,
                time: Mutex::new(TimeContext::new()),
                sinks: Mutex::new(SinkSet::default()),
                observer: self.observer.unwrap_or_default(),
                tick: AtomicI64::new(0),
                warned_unconfigured: AtomicBool::new(false),
            })),
        }
    }

    fn with_sink<S, F>(self, make_sink: F) -> Result<RecordingStream>
    where
        S: LogSink,
        F: FnOnce(&RecordingConfig) -> Result<S>,
    {
        let config = self.resolve_config();
        if !config.enabled {
            return Ok(RecordingStream::disabled());
        }
        let sink = make_sink(&config)?;
        let stream = self.into_stream(config);
        stream.set_sink(sink)?;
        Ok(stream)
    }

    /// Stream into a replayable file at `path`.
    pub fn save(self, path: impl AsRef<Path>) -> Result<RecordingStream> {
        self.with_sink(|_| Ok(FileSink::new(path.as_ref())?))
    }

    /// Stream framed messages to standard output.
    pub fn stdout(self) -> Result<RecordingStream> {
        self.with_sink(|_| Ok(ByteStreamSink::stdout()?))
    }

    /// Keep messages in memory. The storage of a disabled stream stays empty.
    pub fn memory(self) -> Result<(RecordingStream, MemorySinkStorage)> {
        let sink = MemorySink::new();
        let storage = sink.storage();
        let stream = self.with_sink(|_| Ok(sink))?;
        Ok((stream, storage))
    }

    /// Connect to a viewer at the default local address.
    pub fn connect(self) -> Result<RecordingStream> {
        self.connect_to_target(TargetAddress::default())
    }

    /// Connect to a viewer at `scheme://host:port[/path]`.
    pub fn connect_to(self, address: &str) -> Result<RecordingStream> {
        let target = TargetAddress::parse(address)?;
        self.connect_to_target(target)
    }

    fn connect_to_target(self, target: TargetAddress) -> Result<RecordingStream> {
        self.with_sink(|config| Ok(ConnectSink::new(target, config.connect.clone())?))
    }

    /// Launch a viewer unless one is already listening, then connect to it.
    ///
    /// With [`UnavailablePolicy::DropAndContinue`] a viewer that cannot be
    /// reached is reported to the error observer and the stream is returned
    /// without sinks.
    pub fn spawn(self) -> Result<RecordingStream> {
        let config = self.resolve_config();
        if !config.enabled {
            return Ok(RecordingStream::disabled());
        }
        match spawn_and_connect(&config.spawn, &config.connect) {
            Ok(sink) => {
                let stream = self.into_stream(config);
                stream.set_sink(sink)?;
                Ok(stream)
            }
            Err(e) if config.spawn.on_unavailable == UnavailablePolicy::DropAndContinue => {
                let sink_name = format!("spawn:{}", config.spawn.target());
                let observer = self.observer.clone().unwrap_or_default();
                observer.report(sink_name, e);
                Ok(self.into_stream(config))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ─── Stream ──────────────────────────────────────────────────────────────────

/// One immutable generation of the sink set.
#[derive(Default)]
struct Fanout {
    sinks: Vec<Arc<dyn LogSink>>,
    /// Held shared by every delivery pinned to this generation.
    in_flight: RwLock<()>,
}

impl Fanout {
    fn new(sinks: Vec<Arc<dyn LogSink>>) -> Arc<Self> {
        Arc::new(Self {
            sinks,
            in_flight: RwLock::new(()),
        })
    }

    /// Cancel blocked sends, then wait for deliveries still running.
    fn retire(&self) {
        for sink in &self.sinks {
            sink.begin_close();
        }
        drop(self.in_flight.write().unwrap_or_else(PoisonError::into_inner));
    }
}

#[derive(Default)]
struct SinkSet {
    current: Arc<Fanout>,
    closed: bool,
}

struct Inner {
    identity: RecordingIdentity,
    config: RecordingConfig,
    time: Mutex<TimeContext>,
    sinks: Mutex<SinkSet>,
    observer: ErrorObserver,
    tick: AtomicI64,
    warned_unconfigured: AtomicBool,
}

impl Inner {
    fn lock_time(&self) -> MutexGuard<'_, TimeContext> {
        self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sinks(&self) -> MutexGuard<'_, SinkSet> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timepoint(&self) -> TimePoint {
        let mut timepoint = self.lock_time().snapshot();
        if self.config.log_time {
            let tick = self.tick.fetch_add(1, Ordering::SeqCst);
            timepoint.insert(LOG_TICK_TIMELINE, TimeValue::Sequence(tick));
            timepoint.insert(LOG_TIME_TIMELINE, TimeValue::from(Utc::now()));
        }
        timepoint
    }

    fn current(&self) -> Arc<Fanout> {
        Arc::clone(&self.lock_sinks().current)
    }

    fn dispatch(&self, msg: Arc<WireMessage>) -> Result<()> {
        let set = self.lock_sinks();
        if set.closed {
            return Err(VislogError::StreamClosed);
        }
        let fanout = Arc::clone(&set.current);
        if fanout.sinks.is_empty() {
            drop(set);
            if !self.warned_unconfigured.swap(true, Ordering::Relaxed) {
                warn!(
                    recording_id = %self.identity.recording_id,
                    "Logging to a recording stream without sinks; messages are dropped"
                );
            }
            return Ok(());
        }
        // Pinned before the set lock goes, so a swap waits for this delivery.
        let pinned = fanout.in_flight.read().unwrap_or_else(PoisonError::into_inner);
        drop(set);

        let mut failures = Vec::new();
        for sink in &fanout.sinks {
            if let Err(e) = sink.send(Arc::clone(&msg)) {
                failures.push((sink.name(), e));
            }
        }
        drop(pinned);

        for (name, error) in failures {
            self.observer.report(name, error);
        }
        Ok(())
    }

    /// Install `fanout`, retire the one it replaces and close its sinks in
    /// the order they were added.
    fn swap(&self, fanout: Arc<Fanout>) -> Result<usize> {
        let old = {
            let mut set = self.lock_sinks();
            if set.closed {
                return Err(VislogError::StreamClosed);
            }
            std::mem::replace(&mut set.current, fanout)
        };
        old.retire();
        let count = old.sinks.len();
        self.shutdown_sinks(&old.sinks);
        Ok(count)
    }

    /// Close every sink in the order it was added.
    fn shutdown_sinks(&self, sinks: &[Arc<dyn LogSink>]) {
        for sink in sinks {
            if let Err(e) = sink.close() {
                self.observer.report(sink.name(), e);
            }
        }
    }

    fn close(&self) {
        let old = {
            let mut set = self.lock_sinks();
            if set.closed {
                return;
            }
            set.closed = true;
            std::mem::take(&mut set.current)
        };
        old.retire();
        let count = old.sinks.len();
        self.shutdown_sinks(&old.sinks);
        info!(recording_id = %self.identity.recording_id, sinks = count, "Recording stream closed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle for logging into one recording.
///
/// Cloning is cheap and every clone logs into the same recording. The
/// recording is closed by [`close`](Self::close) or when the last clone is
/// dropped. A disabled stream accepts every call and does nothing.
#[derive(Clone)]
pub struct RecordingStream {
    inner: Option<Arc<Inner>>,
}

impl RecordingStream {
    /// A no-op stream, as produced when recording is switched off.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// `None` for a disabled stream.
    pub fn identity(&self) -> Option<&RecordingIdentity> {
        self.inner.as_ref().map(|inner| &inner.identity)
    }

    /// A disabled stream reports `Unconfigured`.
    pub fn state(&self) -> StreamState {
        let Some(inner) = &self.inner else {
            return StreamState::Unconfigured;
        };
        let set = inner.lock_sinks();
        if set.closed {
            StreamState::Closed
        } else if set.current.sinks.is_empty() {
            StreamState::Unconfigured
        } else {
            StreamState::Active
        }
    }

    pub fn sink_count(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.current().sinks.len())
    }

    // ─── Logging ─────────────────────────────────────────────────────────

    /// Log `payload` at `path`, stamped with the current time point.
    pub fn log(&self, path: impl IntoEntityPath, payload: &(impl AsComponents + ?Sized)) -> Result<()> {
        self.log_with_static(path, false, payload)
    }

    /// Log `payload` at `path` with no temporal extent. It supersedes earlier
    /// static values of the same components.
    pub fn log_static(
        &self,
        path: impl IntoEntityPath,
        payload: &(impl AsComponents + ?Sized),
    ) -> Result<()> {
        self.log_with_static(path, true, payload)
    }

    /// Transport failures never fail this call; they go to the error
    /// observer. Errors are a malformed path, a type mismatch in the payload
    /// or a closed stream.
    pub fn log_with_static(
        &self,
        path: impl IntoEntityPath,
        is_static: bool,
        payload: &(impl AsComponents + ?Sized),
    ) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        if inner.lock_sinks().closed {
            return Err(VislogError::StreamClosed);
        }

        let entity_path = path.into_entity_path()?;
        let timepoint = (!is_static).then(|| inner.timepoint());
        let msg = serialize(
            &entity_path,
            is_static,
            timepoint,
            payload.as_component_batches(),
            &inner.identity,
        )?;
        debug!(path = %entity_path, is_static, "Dispatching message");
        inner.dispatch(Arc::new(msg))
    }

    // ─── Time ────────────────────────────────────────────────────────────

    /// Set the current index of `timeline`. Fails without changing anything
    /// if the timeline already holds values of another unit.
    pub fn set_time(&self, timeline: &str, value: impl Into<TimeValue>) -> Result<()> {
        match &self.inner {
            Some(inner) => inner.lock_time().set_index(timeline, value.into()),
            None => Ok(()),
        }
    }

    pub fn set_time_sequence(&self, timeline: &str, sequence: i64) -> Result<()> {
        self.set_time(timeline, TimeValue::Sequence(sequence))
    }

    pub fn set_duration_secs(&self, timeline: &str, secs: f64) -> Result<()> {
        self.set_time(timeline, TimeValue::from_seconds(secs))
    }

    pub fn set_timestamp(&self, timeline: &str, timestamp: DateTime<Utc>) -> Result<()> {
        self.set_time(timeline, timestamp)
    }

    /// Stop stamping messages with `timeline`. Idempotent.
    pub fn disable_timeline(&self, timeline: &str) {
        if let Some(inner) = &self.inner {
            inner.lock_time().clear(timeline);
        }
    }

    /// Clear every active timeline.
    pub fn reset_time(&self) {
        if let Some(inner) = &self.inner {
            inner.lock_time().clear_all();
        }
    }

    /// The user timelines that the next log call would carry.
    pub fn time_snapshot(&self) -> TimePoint {
        self.inner
            .as_ref()
            .map(|inner| inner.lock_time().snapshot())
            .unwrap_or_default()
    }

    // ─── Sinks ───────────────────────────────────────────────────────────

    /// Replace the sink set atomically. Log calls racing with the swap go
    /// either entirely to the old set or entirely to the new one, and none
    /// reaches an old sink once this returns. The old sinks are closed
    /// afterwards, in the order they were added; a send of theirs blocked on
    /// backpressure is cancelled.
    pub fn set_sinks(&self, sinks: Vec<Box<dyn LogSink>>) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        let sinks: Vec<Arc<dyn LogSink>> = sinks.into_iter().map(Arc::from).collect();
        for sink in &sinks {
            sink.attach_observer(&inner.observer);
        }
        let replaced = inner.swap(Fanout::new(sinks))?;
        debug!(replaced, "Sink set replaced");
        Ok(())
    }

    pub fn set_sink(&self, sink: impl LogSink) -> Result<()> {
        self.set_sinks(vec![Box::new(sink)])
    }

    /// Attach one more sink without touching the existing ones. It receives
    /// messages logged from now on.
    pub fn add_sink(&self, sink: impl LogSink) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        sink.attach_observer(&inner.observer);
        let sink: Arc<dyn LogSink> = Arc::new(sink);
        let old = {
            let mut set = inner.lock_sinks();
            if set.closed {
                return Err(VislogError::StreamClosed);
            }
            let mut sinks = set.current.sinks.clone();
            sinks.push(sink);
            std::mem::replace(&mut set.current, Fanout::new(sinks))
        };
        // A later swap only waits on the newest generation.
        drop(old.in_flight.write().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }

    /// Flush every sink. Failures go to the error observer.
    pub fn flush_blocking(&self) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        let fanout = inner.current();
        for sink in &fanout.sinks {
            if let Err(e) = sink.flush() {
                inner.observer.report(sink.name(), e);
            }
        }
        Ok(())
    }

    /// Flush and close every sink and move to [`StreamState::Closed`].
    /// Idempotent; affects every clone of this handle.
    pub fn close(&self) -> Result<()> {
        if let Some(inner) = &self.inner {
            inner.close();
        }
        Ok(())
    }
}

impl fmt::Debug for RecordingStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("RecordingStream")
                .field("application_id", &inner.identity.application_id)
                .field("recording_id", &inner.identity.recording_id)
                .field("state", &self.state())
                .finish(),
            None => f.write_str("RecordingStream(disabled)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentBatch;
    use crate::config::RecordingConfig;
    use crate::error::SinkError;
    use crate::time::TimeType;

    fn memory_stream() -> (RecordingStream, MemorySinkStorage) {
        RecordingStreamBuilder::new("test")
            .config(RecordingConfig::default())
            .recording_id("rec")
            .memory()
            .unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let stream = RecordingStreamBuilder::new("test")
            .config(RecordingConfig::default())
            .build()
            .unwrap();
        assert_eq!(stream.state(), StreamState::Unconfigured);

        stream.set_sink(MemorySink::new()).unwrap();
        assert_eq!(stream.state(), StreamState::Active);

        stream.set_sinks(Vec::new()).unwrap();
        assert_eq!(stream.state(), StreamState::Unconfigured);

        stream.close().unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(matches!(
            stream.set_sink(MemorySink::new()),
            Err(VislogError::StreamClosed)
        ));
    }

    #[test]
    fn test_unconfigured_log_is_dropped() {
        let stream = RecordingStreamBuilder::new("test")
            .config(RecordingConfig::default())
            .build()
            .unwrap();
        assert!(stream.log("a", &ComponentBatch::new("x", vec![1u32])).is_ok());
    }

    #[test]
    fn test_log_after_close_is_rejected() {
        let (stream, storage) = memory_stream();
        stream.log("a", &ComponentBatch::new("x", vec![1u32])).unwrap();
        stream.close().unwrap();
        assert!(storage.is_closed());
        assert!(matches!(
            stream.log("a", &ComponentBatch::new("x", vec![2u32])),
            Err(VislogError::StreamClosed)
        ));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_local_errors_keep_stream_usable() {
        let (stream, storage) = memory_stream();
        assert!(matches!(
            stream.log("a\\", &ComponentBatch::new("x", vec![1u32])),
            Err(VislogError::MalformedPath { .. })
        ));
        stream.set_time_sequence("frame", 1).unwrap();
        assert!(matches!(
            stream.set_duration_secs("frame", 1.0),
            Err(VislogError::TimelineTypeConflict {
                expected: TimeType::Sequence,
                found: TimeType::Duration,
                ..
            })
        ));
        stream.log("a", &ComponentBatch::new("x", vec![1u32])).unwrap();

        let messages = storage.take();
        assert_eq!(messages.len(), 1);
        let timepoint = messages[0].timepoint().unwrap();
        assert_eq!(timepoint.get("frame"), Some(&TimeValue::Sequence(1)));
    }

    #[test]
    fn test_static_log_carries_no_time() {
        let (stream, storage) = memory_stream();
        stream.set_time_sequence("frame", 3).unwrap();
        stream.log_static("cfg", &ComponentBatch::new("name", vec!["cam"])).unwrap();
        let messages = storage.take();
        let msg = &messages[0];
        assert!(msg.is_static());
        assert!(msg.timepoint().is_none());
    }

    #[test]
    fn test_time_helpers() {
        let (stream, storage) = memory_stream();
        stream.set_time_sequence("frame", 7).unwrap();
        stream.set_duration_secs("sim", 1.5).unwrap();
        stream.disable_timeline("sim");
        stream.disable_timeline("sim");
        assert_eq!(stream.time_snapshot().len(), 1);

        stream.reset_time();
        assert!(stream.time_snapshot().is_empty());
        stream.log("a", &ComponentBatch::new("x", vec![1u8])).unwrap();
        assert!(storage.take()[0].timepoint().unwrap().is_empty());

        // The unit of a cleared timeline is still remembered.
        assert!(stream.set_duration_secs("frame", 2.0).is_err());
    }

    #[test]
    fn test_builtin_timelines() {
        let (stream, storage) = RecordingStreamBuilder::new("test")
            .config(RecordingConfig::default())
            .log_time(true)
            .memory()
            .unwrap();
        stream.log("a", &ComponentBatch::new("x", vec![1u8])).unwrap();
        stream.log("a", &ComponentBatch::new("x", vec![2u8])).unwrap();
        stream.log_static("a", &ComponentBatch::new("y", vec![3u8])).unwrap();

        let messages = storage.take();
        let ticks: Vec<_> = messages[..2]
            .iter()
            .map(|m| m.timepoint().unwrap().get(LOG_TICK_TIMELINE).copied())
            .collect();
        assert_eq!(ticks, [Some(TimeValue::Sequence(0)), Some(TimeValue::Sequence(1))]);
        assert_eq!(
            messages[0]
                .timepoint()
                .unwrap()
                .get(LOG_TIME_TIMELINE)
                .map(TimeValue::time_type),
            Some(TimeType::Timestamp)
        );
        assert!(messages[2].timepoint().is_none());
    }

    #[test]
    fn test_disabled_stream_is_noop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("never.vlog");
        let stream = RecordingStreamBuilder::new("test")
            .config(RecordingConfig::default())
            .enabled(false)
            .save(&path)
            .unwrap();

        assert!(!stream.is_enabled());
        assert!(stream.identity().is_none());
        assert!(stream.log("a\\", &ComponentBatch::new("x", vec![1u8])).is_ok());
        assert!(stream.set_time_sequence("t", 1).is_ok());
        assert!(stream.set_duration_secs("t", 1.0).is_ok());
        stream.close().unwrap();
        assert!(stream.log("a", &ComponentBatch::new("x", vec![1u8])).is_ok());
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_of_last_clone_closes() {
        let (stream, storage) = memory_stream();
        let clone = stream.clone();
        drop(stream);
        assert!(!storage.is_closed());
        clone.log("a", &ComponentBatch::new("x", vec![1u8])).unwrap();
        drop(clone);
        assert!(storage.is_closed());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_spawn_drop_and_continue() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&failures);

        let mut config = RecordingConfig::default();
        config.spawn.executable = "definitely-not-a-viewer-binary".to_string();
        config.spawn.port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        config.spawn.wait_timeout_ms = 100;

        let fatal = RecordingStreamBuilder::new("test").config(config.clone()).spawn();
        assert!(matches!(
            fatal,
            Err(VislogError::Sink(SinkError::Unavailable(_)))
        ));

        config.spawn.on_unavailable = UnavailablePolicy::DropAndContinue;
        let stream = RecordingStreamBuilder::new("test")
            .config(config)
            .on_sink_error(move |f| seen.lock().unwrap().push(f.sink.clone()))
            .spawn()
            .unwrap();
        assert_eq!(stream.state(), StreamState::Unconfigured);
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("spawn:"));
    }
}
