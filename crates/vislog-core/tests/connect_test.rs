//! End-to-end tests of a recording stream talking to a fake viewer over TCP.

use std::io::Cursor;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use vislog_core::codec::MessageReader;
use vislog_core::config::{ConnectOptions, RecordingConfig};
use vislog_core::sink::MemorySink;
use vislog_core::{ComponentBatch, RecordingStreamBuilder, SinkError, VislogError};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_to_fake_viewer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let viewer = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut bytes = Vec::new();
        socket.read_to_end(&mut bytes).await.unwrap();
        bytes
    });

    tokio::task::spawn_blocking(move || {
        let rec = RecordingStreamBuilder::new("remote")
            .config(RecordingConfig::default())
            .connect_to(&format!("tcp://127.0.0.1:{port}"))
            .unwrap();
        for frame in 0..10 {
            rec.set_time_sequence("frame", frame).unwrap();
            rec.log("robot/arm", &ComponentBatch::new("angle", vec![frame as f32]))
                .unwrap();
        }
        rec.flush_blocking().unwrap();
        rec.close().unwrap();
    })
    .await
    .unwrap();

    let bytes = viewer.await.unwrap();
    let messages: Vec<_> = MessageReader::new(Cursor::new(bytes))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(messages.len(), 10);
    assert!(messages
        .iter()
        .all(|m| m.recording().application_id == "remote"));
    assert_eq!(
        messages[9].timepoint().unwrap().to_string(),
        "frame=#9"
    );
}

#[test]
fn test_unreachable_viewer_does_not_fail_logging() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&failures);

    let mut config = RecordingConfig::default();
    config.connect = ConnectOptions {
        queue_capacity: 4,
        reconnect_min_ms: 10,
        reconnect_max_ms: 20,
        flush_timeout_ms: 50,
        close_timeout_ms: 50,
        ..ConnectOptions::default()
    };
    let rec = RecordingStreamBuilder::new("remote")
        .config(config)
        .on_sink_error(move |f| {
            let overflow = matches!(f.error, SinkError::Overflow { .. });
            seen.lock().unwrap().push(overflow);
        })
        .connect_to(&format!("127.0.0.1:{port}"))
        .unwrap();

    for i in 0..10u32 {
        rec.log("x", &ComponentBatch::new("v", vec![i])).unwrap();
    }
    rec.close().unwrap();

    let failures = failures.lock().unwrap();
    let overflows = failures.iter().filter(|o| **o).count();
    assert_eq!(overflows, 6);
}

#[test]
fn test_close_cancels_send_blocked_on_stalled_viewer() {
    // The viewer accepts and then never reads.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let viewer = std::thread::spawn(move || listener.accept().map(|(socket, _)| socket));

    let mut config = RecordingConfig::default();
    config.connect = ConnectOptions {
        queue_capacity: 1,
        close_timeout_ms: 200,
        ..ConnectOptions::default()
    };
    let rec = RecordingStreamBuilder::new("stalled")
        .config(config)
        .on_sink_error(|_| {})
        .connect_to(&format!("127.0.0.1:{port}"))
        .unwrap();
    let _socket = viewer.join().unwrap().unwrap();

    let logger = {
        let rec = rec.clone();
        std::thread::spawn(move || {
            let blob = ComponentBatch::new("bytes", vec![0u8; 8 << 20]);
            loop {
                if let Err(e) = rec.log("blob", &blob) {
                    return e;
                }
            }
        })
    };
    std::thread::sleep(Duration::from_millis(300));

    let (done_tx, done_rx) = mpsc::channel();
    let closer = {
        let rec = rec.clone();
        std::thread::spawn(move || {
            rec.close().unwrap();
            done_tx.send(()).unwrap();
        })
    };
    assert!(
        done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
        "close did not return"
    );
    closer.join().unwrap();
    assert!(matches!(logger.join().unwrap(), VislogError::StreamClosed));
}

#[test]
fn test_set_sinks_is_not_held_up_by_stalled_viewer() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let viewer = std::thread::spawn(move || listener.accept().map(|(socket, _)| socket));

    let mut config = RecordingConfig::default();
    config.connect = ConnectOptions {
        queue_capacity: 1,
        close_timeout_ms: 100,
        ..ConnectOptions::default()
    };
    let rec = RecordingStreamBuilder::new("stalled")
        .config(config)
        .on_sink_error(|_| {})
        .connect_to(&format!("127.0.0.1:{port}"))
        .unwrap();
    let _socket = viewer.join().unwrap().unwrap();

    let logger = {
        let rec = rec.clone();
        std::thread::spawn(move || {
            let blob = ComponentBatch::new("bytes", vec![0u8; 8 << 20]);
            for _ in 0..20 {
                rec.log("blob", &blob).unwrap();
            }
        })
    };
    std::thread::sleep(Duration::from_millis(300));

    let replacement = MemorySink::new();
    let storage = replacement.storage();
    let (done_tx, done_rx) = mpsc::channel();
    let swapper = {
        let rec = rec.clone();
        std::thread::spawn(move || {
            rec.set_sink(replacement).unwrap();
            done_tx.send(()).unwrap();
        })
    };
    assert!(
        done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
        "set_sinks did not return"
    );
    swapper.join().unwrap();
    logger.join().unwrap();
    assert!(!storage.is_empty());
}
