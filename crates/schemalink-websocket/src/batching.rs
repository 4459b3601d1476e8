//! Batch window management
//!
//! Batchable calls accumulate in a window that flushes when it holds
//! `max_batch_size` items or `max_batch_delay` has passed since its first
//! item, whichever comes first. Each window carries a generation number so a
//! delayed flush never takes items from a later window.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::BatchConfig;

/// A call queued in a batch window. Its result slot is already registered
/// with the correlator under `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// Correlation id of the item
    pub id: String,
    /// Tool method name
    pub method: String,
    /// Tool parameters
    pub params: Value,
    /// Submission time, seconds since the Unix epoch
    pub timestamp: f64,
}

/// What the caller must do after queueing an entry.
#[derive(Debug, PartialEq)]
pub enum PushOutcome {
    /// The window filled up; send these items now.
    Flush(Vec<BatchEntry>),
    /// The entry opened a new window; flush it after the delay.
    ScheduleFlush {
        /// Generation of the new window
        generation: u64,
        /// Delay before the flush
        delay: Duration,
    },
    /// The entry joined an open window.
    Queued,
}

#[derive(Debug)]
struct BatchWindow {
    items: Vec<BatchEntry>,
    opened_at: Option<Instant>,
    generation: u64,
}

/// Coalesces batchable calls into windows.
#[derive(Debug)]
pub struct BatchingEngine {
    config: BatchConfig,
    window: Mutex<BatchWindow>,
}

impl BatchingEngine {
    /// Create an engine with the given window limits
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            window: Mutex::new(BatchWindow {
                items: Vec::new(),
                opened_at: None,
                generation: 0,
            }),
        }
    }

    /// Whether batching is active at all
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Adds an entry to the current window.
    pub fn push(&self, entry: BatchEntry) -> PushOutcome {
        let mut window = self.window.lock();

        let opened = window.items.is_empty();
        if opened {
            window.generation = window.generation.wrapping_add(1);
            window.opened_at = Some(Instant::now());
        }
        window.items.push(entry);

        if window.items.len() >= self.config.max_batch_size {
            window.opened_at = None;
            return PushOutcome::Flush(std::mem::take(&mut window.items));
        }

        if opened {
            PushOutcome::ScheduleFlush {
                generation: window.generation,
                delay: self.config.max_batch_delay,
            }
        } else {
            PushOutcome::Queued
        }
    }

    /// Takes the window's items if it is still the window of `generation`.
    pub fn take_expired(&self, generation: u64) -> Option<Vec<BatchEntry>> {
        let mut window = self.window.lock();
        if window.generation != generation || window.items.is_empty() {
            return None;
        }
        window.opened_at = None;
        Some(std::mem::take(&mut window.items))
    }

    /// Empties the current window.
    pub fn drain(&self) -> Vec<BatchEntry> {
        let mut window = self.window.lock();
        window.opened_at = None;
        std::mem::take(&mut window.items)
    }

    /// Items waiting in the open window
    pub fn queued(&self) -> usize {
        self.window.lock().items.len()
    }

    /// How long the current window has been open
    pub fn window_age(&self) -> Option<Duration> {
        self.window.lock().opened_at.map(|at| at.elapsed())
    }
}
