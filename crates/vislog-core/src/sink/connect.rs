//! Network sink with a bounded queue and a background delivery worker.
//!
//! `send` only enqueues. A worker task on a dedicated tokio runtime owns the
//! TCP connection, writes frames in queue order and reconnects with
//! exponential backoff when the viewer goes away. A frame leaves the queue
//! only after it has been written, so a message cut off by a disconnect is
//! re-sent on the next connection.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{ErrorObserver, LogSink};
use crate::codec::{encode_frame, WireMessage, END_OF_STREAM, STREAM_MAGIC};
use crate::config::{Backpressure, ConnectOptions, TargetAddress};
use crate::error::SinkError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const BLOCK_RECHECK: Duration = Duration::from_millis(50);

/// Delivery counters of a [`ConnectSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectStats {
    pub sent: u64,
    pub dropped: u64,
    pub queued: usize,
    pub connected: bool,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<(u64, Arc<WireMessage>)>,
    next_seq: u64,
    connected: bool,
    closing: bool,
    worker_done: bool,
    sent: u64,
    dropped: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when the queue shrinks.
    space: Condvar,
    /// Signalled when the queue empties or the worker exits.
    drained: Condvar,
    wake: Notify,
    observer: Mutex<ErrorObserver>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, sink: &str, error: SinkError) {
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        observer.report(sink, error);
    }
}

/// Streams framed messages to a remote viewer over TCP.
pub struct ConnectSink {
    target: TargetAddress,
    options: ConnectOptions,
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
}

impl ConnectSink {
    /// Start the delivery worker. Connecting happens in the background, so an
    /// unreachable target is not an error here.
    pub fn new(target: TargetAddress, options: ConnectOptions) -> Result<Self, SinkError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("vislog-connect")
            .enable_all()
            .build()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            space: Condvar::new(),
            drained: Condvar::new(),
            wake: Notify::new(),
            observer: Mutex::new(ErrorObserver::default()),
        });

        let name = format!("connect:{target}");
        runtime.spawn(delivery_worker(
            Arc::clone(&shared),
            target.socket_addr(),
            options.clone(),
            name,
        ));

        info!(target = %target, capacity = options.queue_capacity, "Connect sink started");

        Ok(Self {
            target,
            options,
            shared,
            runtime: Mutex::new(Some(runtime)),
        })
    }

    pub fn target(&self) -> &TargetAddress {
        &self.target
    }

    pub fn stats(&self) -> ConnectStats {
        let state = self.shared.lock();
        ConnectStats {
            sent: state.sent,
            dropped: state.dropped,
            queued: state.queue.len(),
            connected: state.connected,
        }
    }

    fn capacity(&self) -> usize {
        self.options.queue_capacity.max(1)
    }
}

impl LogSink for ConnectSink {
    fn name(&self) -> String {
        format!("connect:{}", self.target)
    }

    fn send(&self, msg: Arc<WireMessage>) -> Result<(), SinkError> {
        let capacity = self.capacity();
        let mut state = self.shared.lock();
        let mut overflowed = false;

        loop {
            if state.closing || state.worker_done {
                return Err(SinkError::Closed);
            }
            if state.queue.len() < capacity {
                break;
            }
            match self.options.backpressure {
                Backpressure::DropOldest => {
                    state.queue.pop_front();
                    state.dropped += 1;
                    overflowed = true;
                }
                // Waiting only makes sense while someone is draining.
                Backpressure::Block if !state.connected => {
                    state.dropped += 1;
                    return Err(SinkError::Overflow { capacity });
                }
                Backpressure::Block => {
                    state = self
                        .shared
                        .space
                        .wait_timeout(state, BLOCK_RECHECK)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push_back((seq, msg));
        drop(state);
        self.shared.wake.notify_one();

        if overflowed {
            Err(SinkError::Overflow { capacity })
        } else {
            Ok(())
        }
    }

    fn flush(&self) -> Result<(), SinkError> {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .drained
            .wait_timeout_while(state, self.options.flush_timeout(), |s| {
                !s.queue.is_empty() && !s.worker_done
            })
            .unwrap_or_else(PoisonError::into_inner);
        if state.queue.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Unavailable(format!(
                "flush timed out with {} messages queued",
                state.queue.len()
            )))
        }
    }

    fn begin_close(&self) {
        self.shared.lock().closing = true;
        self.shared.space.notify_all();
        self.shared.wake.notify_one();
    }

    fn close(&self) -> Result<(), SinkError> {
        let Some(runtime) = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        self.shared.lock().closing = true;
        self.shared.wake.notify_one();

        let state = self.shared.lock();
        let (mut state, _) = self
            .shared
            .drained
            .wait_timeout_while(state, self.options.close_timeout(), |s| !s.worker_done)
            .unwrap_or_else(PoisonError::into_inner);
        let undelivered = state.queue.len();
        state.dropped += undelivered as u64;
        state.queue.clear();
        let finished = state.worker_done;
        drop(state);

        runtime.shutdown_background();
        debug!(target = %self.target, undelivered, "Connect sink closed");

        if finished && undelivered == 0 {
            Ok(())
        } else {
            Err(SinkError::Unavailable(format!(
                "{undelivered} messages undelivered at close"
            )))
        }
    }

    fn attach_observer(&self, observer: &ErrorObserver) {
        *self
            .shared
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = observer.clone();
    }
}

impl Drop for ConnectSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ─── Delivery worker ─────────────────────────────────────────────────────────

async fn delivery_worker(shared: Arc<Shared>, addr: String, options: ConnectOptions, name: String) {
    let mut attempt: u32 = 0;
    let mut outage_reported = false;

    loop {
        {
            let state = shared.lock();
            if state.closing && state.queue.is_empty() && attempt > 0 {
                break;
            }
        }

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await;
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                fail_attempt(&shared, &name, &mut outage_reported, e.to_string());
                tokio::time::sleep(options.reconnect_delay(attempt)).await;
                attempt = attempt.saturating_add(1);
                continue;
            }
            Err(_) => {
                fail_attempt(&shared, &name, &mut outage_reported, "connect timed out".into());
                attempt = attempt.saturating_add(1);
                continue;
            }
        };

        let _ = stream.set_nodelay(true);
        shared.lock().connected = true;
        if outage_reported {
            info!(sink = %name, "Reconnected");
        }

        match pump(&shared, stream).await {
            Ok(()) => break,
            Err(e) => {
                shared.lock().connected = false;
                shared.space.notify_all();
                warn!(sink = %name, error = %e, "Connection lost");
                shared.report(&name, SinkError::Unavailable(format!("connection lost: {e}")));
                outage_reported = true;
                attempt = 1;
            }
        }
    }

    let mut state = shared.lock();
    state.connected = false;
    state.worker_done = true;
    drop(state);
    shared.drained.notify_all();
    shared.space.notify_all();
}

fn fail_attempt(shared: &Shared, name: &str, outage_reported: &mut bool, reason: String) {
    {
        let mut state = shared.lock();
        state.connected = false;
    }
    shared.space.notify_all();
    if !*outage_reported {
        shared.report(name, SinkError::Unavailable(reason));
        *outage_reported = true;
    }
}

/// Drain the queue over one connection. Returns `Ok` once the stream has been
/// finished after a close request.
async fn pump(shared: &Shared, mut stream: TcpStream) -> std::io::Result<()> {
    stream.write_all(&STREAM_MAGIC).await?;

    loop {
        // The guard must be gone before any await.
        let next = {
            let state = shared.lock();
            match state.queue.front() {
                Some((seq, msg)) => Some(Some((*seq, Arc::clone(msg)))),
                None if state.closing => Some(None),
                None => None,
            }
        };
        let Some(next) = next else {
            shared.wake.notified().await;
            continue;
        };

        let Some((seq, msg)) = next else {
            stream.write_all(&END_OF_STREAM).await?;
            stream.flush().await?;
            stream.shutdown().await?;
            return Ok(());
        };

        stream.write_all(&encode_frame(&msg)).await?;

        let mut state = shared.lock();
        // The front may have been evicted by a drop-oldest overflow meanwhile.
        if state.queue.front().map(|(s, _)| *s) == Some(seq) {
            state.queue.pop_front();
        }
        state.sent += 1;
        let empty = state.queue.is_empty();
        drop(state);
        shared.space.notify_all();
        if empty {
            shared.drained.notify_all();
        }
    }
}
