//! Output relays: pump a child's stream, line by line, into a durable sink.
//!
//! Relays run concurrently with the control flow and are only awaited during
//! stop/cleanup. Stream I/O errors end a relay silently; they are expected
//! when a process closes its pipes on exit.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::logs::{LogSink, LogStream};

/// Copy every line from `stream` into `sink` until EOF or error.
pub fn spawn_relay<S>(stream: S, label: LogStream, mut sink: LogSink) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let reader = BufReader::new(stream);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink.write_line(&line);
            // Flush when the reader has no more buffered data, so lines
            // become visible promptly while consecutive lines that arrive
            // together are still batched.
            if lines.get_ref().buffer().is_empty() {
                sink.flush();
            }
        }
        sink.flush();
        debug!("{} relay for {:?} finished", label, sink.path());
    })
}

/// Copy every line from `stream` into a shared in-memory buffer. Used for
/// the shutdown client, whose combined output is kept for diagnostics.
pub fn spawn_capture<S>(stream: S, buffer: Arc<Mutex<String>>) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let reader = BufReader::new(stream);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut buffer = buffer.lock();
            buffer.push_str(&line);
            buffer.push('\n');
        }
    })
}
