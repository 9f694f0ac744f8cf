//! Tracing setup: console output plus a size-rotated plain-text status log.
//!
//! The status log uses the plant-standard line format
//! `[TIMESTAMP] [LEVEL] [NAME] - message` and rotates at 10 MB with three
//! numbered backups (`app_status.log.1` ... `.3`).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::defaults::{LOG_BACKUP_COUNT, LOG_MAX_BYTES};

// ============================================================================
// Rotating file writer
// ============================================================================

/// Append-only writer that rotates `path` -> `path.1` -> ... -> `path.N`
/// when the active file would exceed `max_bytes`.
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingInner>>,
}

struct RotatingInner {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: Option<File>,
    written: u64,
}

impl RotatingFileWriter {
    pub fn new(path: PathBuf, max_bytes: u64, backups: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RotatingInner {
                path,
                max_bytes,
                backups,
                file: None,
                written: 0,
            })),
        }
    }
}

impl RotatingInner {
    fn ensure_open(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
            self.file = Some(file);
        }
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;
        // Shift backups upward, discarding the oldest.
        let backup = |n: usize| -> PathBuf {
            let mut p = self.path.clone().into_os_string();
            p.push(format!(".{n}"));
            PathBuf::from(p)
        };
        let oldest = backup(self.backups);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for n in (1..self.backups).rev() {
            let from = backup(n);
            if from.exists() {
                let _ = std::fs::rename(&from, backup(n + 1));
            }
        }
        if self.path.exists() {
            let _ = std::fs::rename(&self.path, backup(1));
        }
        self.written = 0;
        self.ensure_open()
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Ok(mut inner) = self.inner.lock() else {
            return Ok(buf.len());
        };
        inner.ensure_open()?;
        if inner.written + buf.len() as u64 > inner.max_bytes {
            inner.rotate()?;
        }
        if let Some(file) = inner.file.as_mut() {
            file.write_all(buf)?;
        }
        inner.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(file) = inner.file.as_mut() {
                return file.flush();
            }
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ============================================================================
// Status log line format
// ============================================================================

/// `[TIMESTAMP] [LEVEL] [NAME] - message`
struct StatusLogFormat;

impl<S, N> FormatEvent<S, N> for StatusLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'w> FormatFields<'w> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write!(
            writer,
            "[{}] [{}] [{}] - ",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
            event.metadata().level(),
            event.metadata().target()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Install the global subscriber: env-filtered console output plus the
/// rotating status log. Safe to call once per process.
pub fn init(status_log_path: &Path) {
    let file_writer = RotatingFileWriter::new(
        status_log_path.to_path_buf(),
        LOG_MAX_BYTES,
        LOG_BACKUP_COUNT,
    );

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(StatusLogFormat)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init();
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_rotates_with_bounded_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_status.log");
        let mut writer = RotatingFileWriter::new(path.clone(), 64, 3);

        let line = vec![b'x'; 40];
        for _ in 0..12 {
            writer.write_all(&line).unwrap();
        }
        writer.flush().unwrap();

        assert!(path.exists());
        assert!(dir.path().join("app_status.log.1").exists());
        // Never more than `backups` numbered files
        assert!(!dir.path().join("app_status.log.4").exists());
        // Active file stays under the limit
        let len = std::fs::metadata(&path).unwrap().len();
        assert!(len <= 64, "active log is {len} bytes");
    }

    #[test]
    fn rotation_shifts_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.log");
        let mut writer = RotatingFileWriter::new(path.clone(), 10, 2);

        writer.write_all(b"first....\n").unwrap();
        writer.write_all(b"second...\n").unwrap();
        writer.flush().unwrap();

        let rolled = std::fs::read_to_string(dir.path().join("s.log.1")).unwrap();
        assert!(rolled.contains("first"));
        let active = std::fs::read_to_string(&path).unwrap();
        assert!(active.contains("second"));
    }
}
