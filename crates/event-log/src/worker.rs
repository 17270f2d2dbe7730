//! Background writer: drains the queue to disk and to the publisher

use crate::config::LogFormat;
use crate::entry::LogEntry;
use crate::queue::EventQueue;
use crate::LoggerError;
use cloud_sync::EventPublisher;
use metrics::counter;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Counters shared between the logger handle and the writer
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub written: AtomicU64,
    pub write_failures: AtomicU64,
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
}

/// Append-only event log file
pub(crate) struct LogFile {
    path: PathBuf,
    format: LogFormat,
    writer: BufWriter<File>,
}

impl LogFile {
    pub fn open(path: &Path, format: LogFormat) -> Result<Self, LoggerError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| LoggerError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            format,
            writer: BufWriter::new(file),
        })
    }

    fn write_entry(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = match self.format {
            LogFormat::JsonLines => entry.to_json_line(),
            LogFormat::PlainText => entry.to_text_line(),
        };
        writeln!(self.writer, "{}", line)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

pub(crate) struct Worker {
    pub queue: Arc<EventQueue>,
    pub file: Option<LogFile>,
    pub publisher: Option<Arc<dyn EventPublisher>>,
    pub stop: Arc<AtomicBool>,
    pub interval: Duration,
    pub counters: Arc<WorkerCounters>,
}

impl Worker {
    /// Drain until stopped. The stop flag is read before each drain so the
    /// final pass sees every entry pushed before shutdown was requested.
    pub fn run(mut self, done: SyncSender<()>) {
        debug!("Event writer started");
        loop {
            let stopping = self.stop.load(Ordering::Acquire);

            let batch = self.queue.take_all();
            if !batch.is_empty() {
                self.process(batch);
            }

            if stopping && self.queue.is_empty() {
                break;
            }
            std::thread::park_timeout(self.interval);
        }

        debug!("Event writer stopped");
        let _ = done.send(());
    }

    fn process(&mut self, batch: VecDeque<LogEntry>) {
        if let Some(file) = self.file.as_mut() {
            let mut written = 0u64;
            let mut failed = 0u64;
            for entry in &batch {
                match file.write_entry(entry) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        failed += 1;
                        error!("Failed to write event to {}: {}", file.path.display(), e);
                    }
                }
            }
            // Buffered lines only count once they reach the file
            if let Err(e) = file.flush() {
                error!("Failed to flush {} events to {}: {}", written, file.path.display(), e);
                failed += written;
                written = 0;
            }

            self.counters.written.fetch_add(written, Ordering::Relaxed);
            counter!("event_log_entries_written").increment(written);
            if failed > 0 {
                self.counters.write_failures.fetch_add(failed, Ordering::Relaxed);
                counter!("event_log_write_failures").increment(failed);
            }
        }

        if let Some(publisher) = &self.publisher {
            let mut rejected = 0u64;
            for entry in &batch {
                if publisher.publish_message(&entry.to_json_line()) {
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                } else {
                    rejected += 1;
                }
            }
            if rejected > 0 {
                self.counters.publish_failures.fetch_add(rejected, Ordering::Relaxed);
                warn!("{} of {} events not handed to the publisher", rejected, batch.len());
            }
        }
    }
}
