//! Subprocess output draining.
//!
//! Both pipes are read concurrently until EOF so the engine never blocks on
//! a full pipe. Lines are decoded lossily and forwarded to the log sink.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Log level a stream is forwarded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLevel {
    Info,
    Debug,
    Error,
}

impl StreamLevel {
    /// Stdout level; demoted to debug when engine output is suppressed.
    pub fn stdout(suppress: bool) -> Self {
        if suppress {
            StreamLevel::Debug
        } else {
            StreamLevel::Info
        }
    }
}

/// Spawns a task draining `reader` line by line. Resolves to the line count.
pub fn spawn<R>(reader: R, level: StreamLevel) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(drain(reader, level))
}

async fn drain<R>(reader: R, level: StreamLevel) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lines = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                emit(level, text.trim_end_matches(['\r', '\n']));
                lines += 1;
            }
            Err(e) => {
                warn!("Error reading engine output: {}", e);
                break;
            }
        }
    }

    lines
}

fn emit(level: StreamLevel, line: &str) {
    match level {
        StreamLevel::Info => info!("{}", line),
        StreamLevel::Debug => debug!("{}", line),
        StreamLevel::Error => error!("{}", line),
    }
}

/// Waits for a drain task, giving up after `timeout`.
///
/// A descendant of the engine can keep a pipe open after the engine itself
/// has exited; the task is aborted rather than left behind.
pub async fn join(handle: Option<JoinHandle<usize>>, stream: &str, timeout: Duration) {
    let Some(mut handle) = handle else {
        return;
    };

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(lines)) => debug!("Drained {} lines from {}", lines, stream),
        Ok(Err(e)) => warn!("{} drain task failed: {}", stream, e),
        Err(_) => {
            warn!("Timed out draining {} after {:?}", stream, timeout);
            handle.abort();
        }
    }
}
