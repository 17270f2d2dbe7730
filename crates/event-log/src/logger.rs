//! Event logger handle used by the frame loop

use crate::config::LoggerConfig;
use crate::entry::LogEntry;
use crate::queue::EventQueue;
use crate::snapshot::SnapshotStore;
use crate::worker::{LogFile, Worker, WorkerCounters};
use crate::LoggerError;
use camera_capture::VideoFrame;
use chrono::Local;
use cloud_sync::{EventPublisher, MessagePublisher};
use dms::DriverState;
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Cumulative logger counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LoggerStats {
    /// Entries accepted into the queue
    pub enqueued: u64,
    /// Entries appended to the log file
    pub written: u64,
    /// Entries evicted from a full queue
    pub dropped: u64,
    pub write_failures: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub snapshots: u64,
    pub snapshot_failures: u64,
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    done: Receiver<()>,
}

struct Active {
    config: LoggerConfig,
    queue: Arc<EventQueue>,
    snapshots: Option<SnapshotStore>,
    publisher: Option<Arc<dyn EventPublisher>>,
    stop: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    worker: Mutex<Option<WorkerHandle>>,
    snapshots_written: AtomicU64,
    snapshot_failures: AtomicU64,
}

impl Active {
    fn has_worker(&self) -> bool {
        lock(&self.worker).is_some()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Asynchronous driver event logger.
///
/// Configured once with [`EventLogger::setup`]; afterwards [`EventLogger::log`]
/// only formats, optionally writes a snapshot, and enqueues. File writes and
/// publishing happen on a single background thread.
pub struct EventLogger {
    active: OnceLock<Active>,
    setup_guard: Mutex<()>,
    closed: AtomicBool,
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLogger {
    pub fn new() -> Self {
        Self {
            active: OnceLock::new(),
            setup_guard: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Configure the logger. Later calls are ignored with a warning.
    ///
    /// A publisher that cannot be created disables publishing for the run
    /// instead of failing setup.
    pub fn setup(&self, config: LoggerConfig) -> Result<(), LoggerError> {
        self.setup_inner(config, None)
    }

    /// Configure the logger with a caller-supplied publisher
    pub fn setup_with_publisher(
        &self,
        mut config: LoggerConfig,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<(), LoggerError> {
        config.enable_publishing = true;
        self.setup_inner(config, Some(publisher))
    }

    fn setup_inner(
        &self,
        mut config: LoggerConfig,
        publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Result<(), LoggerError> {
        let _guard = lock(&self.setup_guard);
        if self.active.get().is_some() {
            warn!("Event logger already configured, ignoring new configuration");
            return Ok(());
        }

        config.validate()?;

        let publisher = match publisher {
            Some(publisher) => Some(publisher),
            None if config.enable_publishing => match MessagePublisher::bind(config.publisher.clone()) {
                Ok(publisher) => Some(Arc::new(publisher) as Arc<dyn EventPublisher>),
                Err(e) => {
                    warn!("Event publishing disabled: {}", e);
                    None
                }
            },
            None => None,
        };
        config.enable_publishing = publisher.is_some();

        let snapshots = if config.save_snapshots {
            std::fs::create_dir_all(&config.snapshot_path)
                .map_err(|e| LoggerError::io(&config.snapshot_path, e))?;
            Some(SnapshotStore::new(&config.snapshot_path))
        } else {
            None
        };

        let file = if config.enable_file_logging {
            std::fs::create_dir_all(&config.log_path)
                .map_err(|e| LoggerError::io(&config.log_path, e))?;
            Some(LogFile::open(&config.log_file(), config.log_format)?)
        } else {
            None
        };

        let queue = Arc::new(EventQueue::new(config.queue_capacity));
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(WorkerCounters::default());

        let worker = if config.needs_worker() {
            let (done_tx, done) = mpsc::sync_channel(1);
            let worker = Worker {
                queue: Arc::clone(&queue),
                file,
                publisher: publisher.clone(),
                stop: Arc::clone(&stop),
                interval: config.worker_interval(),
                counters: Arc::clone(&counters),
            };
            let thread = std::thread::Builder::new()
                .name("event-log-writer".to_string())
                .spawn(move || worker.run(done_tx))
                .map_err(|e| LoggerError::Worker(e.to_string()))?;
            Some(WorkerHandle { thread, done })
        } else {
            None
        };

        info!(
            "Event logger configured (file: {}, snapshots: {}, publishing: {}, console: {})",
            if config.enable_file_logging {
                config.log_file().display().to_string()
            } else {
                "off".to_string()
            },
            config.save_snapshots,
            config.enable_publishing,
            config.enable_console_logging
        );

        let active = Active {
            config,
            queue,
            snapshots,
            publisher,
            stop,
            counters,
            worker: Mutex::new(worker),
            snapshots_written: AtomicU64::new(0),
            snapshot_failures: AtomicU64::new(0),
        };
        if self.active.set(active).is_err() {
            // Unreachable while setup_guard is held
            warn!("Event logger configured concurrently");
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.active.get().is_some()
    }

    /// Effective configuration after setup
    pub fn config(&self) -> Option<&LoggerConfig> {
        self.active.get().map(|active| &active.config)
    }

    /// Record one driver event.
    ///
    /// Never blocks on disk or network except for the snapshot encode, which
    /// only happens for non-alert states with a frame supplied.
    pub fn log(
        &self,
        state: DriverState,
        message: &str,
        ear: f64,
        mar: f64,
        yaw: Option<f64>,
        frame: Option<&VideoFrame>,
    ) {
        let Some(active) = self.active.get() else {
            warn!("Event logger not configured, dropping {} event", state);
            return;
        };
        if self.closed.load(Ordering::Acquire) {
            warn!("Event logger shut down, dropping {} event", state);
            return;
        }

        let timestamp = Local::now();

        let image = match (&active.snapshots, frame) {
            (Some(store), Some(frame)) if state != DriverState::Alert => {
                match store.save(frame, state, timestamp) {
                    Ok(path) => {
                        active.snapshots_written.fetch_add(1, Ordering::Relaxed);
                        Some(path)
                    }
                    Err(e) => {
                        active.snapshot_failures.fetch_add(1, Ordering::Relaxed);
                        counter!("event_log_snapshot_failures").increment(1);
                        warn!("Snapshot for {} event failed: {}", state, e);
                        None
                    }
                }
            }
            _ => None,
        };

        let entry = LogEntry::new(timestamp, state, message, ear, mar, yaw, image);

        if active.config.enable_console_logging {
            info!(target: "driver_event", "{}", entry.to_text_line());
        }

        if active.config.needs_worker() {
            let evicted = active.queue.push(entry);
            if evicted > 0 {
                counter!("event_log_entries_dropped").increment(evicted as u64);
            }
        }
    }

    pub fn stats(&self) -> LoggerStats {
        let Some(active) = self.active.get() else {
            return LoggerStats::default();
        };
        LoggerStats {
            enqueued: active.queue.enqueued(),
            written: active.counters.written.load(Ordering::Relaxed),
            dropped: active.queue.dropped(),
            write_failures: active.counters.write_failures.load(Ordering::Relaxed),
            published: active.counters.published.load(Ordering::Relaxed),
            publish_failures: active.counters.publish_failures.load(Ordering::Relaxed),
            snapshots: active.snapshots_written.load(Ordering::Relaxed),
            snapshot_failures: active.snapshot_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop the writer after it drains the queue, then release the publisher.
    ///
    /// Waits at most `shutdown_timeout_ms` for the writer. Idempotent.
    pub fn shutdown(&self) {
        let Some(active) = self.active.get() else {
            return;
        };
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        active.stop.store(true, Ordering::Release);

        let handle = lock(&active.worker).take();
        if let Some(handle) = handle {
            handle.thread.thread().unpark();
            let timeout = active.config.shutdown_timeout();
            match handle.done.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if handle.thread.join().is_err() {
                        error!("Event writer thread panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Event writer did not finish within {:?}, {} entries pending",
                        timeout,
                        active.queue.len()
                    );
                }
            }
        }

        if let Some(publisher) = &active.publisher {
            publisher.shutdown();
        }

        let stats = self.stats();
        info!(
            "Event logger shut down. Enqueued: {}, Written: {}, Dropped: {}, Published: {}",
            stats.enqueued, stats.written, stats.dropped, stats.published
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether a background writer is still running
    pub fn is_running(&self) -> bool {
        self.active.get().is_some_and(Active::has_worker) && !self.is_shut_down()
    }
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        self.shutdown();
    }
}
