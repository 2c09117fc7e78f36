//! Log output: every line goes to stdout and is appended to a log file on
//! the host. The file is best effort; if it cannot be opened or written the
//! line is dropped there and stdout still gets it.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Local wall-clock timestamps, e.g. `2026-10-18 21:04:05`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// A [`MakeWriter`] that appends to `path`, swallowing every I/O error.
#[derive(Debug, Clone)]
pub struct BestEffortFile {
    path: PathBuf,
}

impl BestEffortFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct BestEffortWriter {
    file: Option<std::fs::File>,
}

impl Write for BestEffortWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = self.file.as_mut() {
            if file.write_all(buf).is_err() {
                self.file = None;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for BestEffortFile {
    type Writer = BestEffortWriter;

    fn make_writer(&'a self) -> Self::Writer {
        // Opened per event so a log directory that appears mid-run (or a
        // rotated file) is picked up.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .ok();
        BestEffortWriter { file }
    }
}

/// Install the global subscriber. Call once, first thing in `main`.
///
/// `RUST_LOG` overrides the default `info` level.
pub fn init(log_file: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout = tracing_subscriber::fmt::layer()
        .with_timer(LocalTime)
        .with_target(false)
        .with_ansi(io::stdout().is_terminal())
        .with_writer(io::stdout);

    let file = tracing_subscriber::fmt::layer()
        .with_timer(LocalTime)
        .with_target(false)
        .with_ansi(false)
        .with_writer(BestEffortFile::new(log_file));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_to_file() {
        let dir = TempDir::new().unwrap();
        let sink = BestEffortFile::new(dir.path().join("ups.log"));
        sink.make_writer().write_all(b"first\n").unwrap();
        sink.make_writer().write_all(b"second\n").unwrap();
        assert_eq!(
            std::fs::read_to_string(sink.path()).unwrap(),
            "first\nsecond\n"
        );
    }

    #[test]
    fn unwritable_path_is_silently_ignored() {
        let dir = TempDir::new().unwrap();
        let sink = BestEffortFile::new(dir.path().join("missing/dir/ups.log"));
        let mut writer = sink.make_writer();
        assert_eq!(writer.write(b"dropped\n").unwrap(), 8);
        assert!(writer.flush().is_ok());
        assert!(!sink.path().exists());
    }
}
