//! Launching a companion viewer process.

use std::net::{SocketAddr, TcpStream};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::ConnectSink;
use crate::config::{ConnectOptions, SpawnOptions};
use crate::error::SinkError;

const LISTEN_CHECK_TIMEOUT: Duration = Duration::from_millis(200);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn is_listening(addr: &SocketAddr) -> bool {
    TcpStream::connect_timeout(addr, LISTEN_CHECK_TIMEOUT).is_ok()
}

/// Make sure a viewer listens on the configured port, launching one if
/// needed. An already-running viewer is reused.
pub fn spawn(options: &SpawnOptions) -> Result<(), SinkError> {
    let target = options.target();
    let addr: SocketAddr = target
        .socket_addr()
        .parse()
        .map_err(|e| SinkError::Unavailable(format!("bad viewer address {target}: {e}")))?;

    if is_listening(&addr) {
        debug!(%addr, "Viewer already running");
        return Ok(());
    }

    info!(executable = %options.executable, port = options.port, "Spawning viewer");
    let mut child = Command::new(&options.executable)
        .arg("serve")
        .arg("--port")
        .arg(options.port.to_string())
        .args(&options.extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|e| {
            SinkError::Unavailable(format!("failed to launch '{}': {e}", options.executable))
        })?;

    let deadline = Instant::now() + options.wait_timeout();
    while Instant::now() < deadline {
        if is_listening(&addr) {
            return Ok(());
        }
        if let Ok(Some(status)) = child.try_wait() {
            return Err(SinkError::Unavailable(format!(
                "viewer exited early with {status}"
            )));
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    Err(SinkError::Unavailable(format!(
        "viewer did not listen on {addr} within {:?}",
        options.wait_timeout()
    )))
}

/// [`spawn`], then connect to the viewer.
pub fn spawn_and_connect(
    spawn_options: &SpawnOptions,
    connect_options: &ConnectOptions,
) -> Result<ConnectSink, SinkError> {
    spawn(spawn_options)?;
    ConnectSink::new(spawn_options.target(), connect_options.clone())
}
