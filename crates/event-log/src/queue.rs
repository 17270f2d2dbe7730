//! Bounded event queue between the frame loop and the writer thread

use crate::entry::LogEntry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// FIFO of pending entries. When full, the oldest entry is discarded.
pub struct EventQueue {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY))),
            capacity,
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    // The queue holds plain data, a panic mid-push leaves it consistent
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry, returning how many old entries were evicted
    pub fn push(&self, entry: LogEntry) -> usize {
        let mut evicted = 0;
        {
            let mut entries = self.lock();
            while entries.len() >= self.capacity {
                entries.pop_front();
                evicted += 1;
            }
            entries.push_back(entry);
        }

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.dropped.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Take every pending entry, leaving the queue empty
    pub fn take_all(&self) -> VecDeque<LogEntry> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
