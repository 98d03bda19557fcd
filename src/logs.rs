//! Log sinks for captured instance output.
//!
//! Each relay task owns its sink exclusively, so no locking is involved.
//! A sink is created fresh for every process generation: the stale file is
//! deleted, parent directories are (re)created, and writing starts from an
//! empty file.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::Result;

pub const OUTPUT_LOG: &str = "output.log";
pub const ERROR_LOG: &str = "error.log";
pub const DUMP_LOG: &str = "threadDump.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Buffered line writer for one output stream.
///
/// Write errors after creation do not surface: the sink logs once, goes
/// dormant, and the relay keeps draining the stream so the child never
/// blocks on a full pipe.
pub struct LogSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .finish()
    }
}

impl LogSink {
    /// Delete any stale file, recreate parent directories, and open fresh.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn write_line(&mut self, line: &str) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writeln!(writer, "{}", line) {
                warn!("failed to write log entry to {:?}: {}", self.path, e);
                self.writer = None;
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                warn!("failed to flush log file {:?}: {}", self.path, e);
                self.writer = None;
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Overwrite-create a diagnostic dump file.
pub fn write_dump(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}
