//! Progress events and the channel that carries them to the presentation layer
//!
//! The core never touches a UI. Downloads and extractions emit typed
//! [`ProgressEvent`]s into a [`ProgressSink`]; one consumer task drains the
//! channel and hands events to a [`ProgressObserver`].

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use super::batch::BatchReport;

/// Capacity of the shared progress channel
pub const PROGRESS_CHANNEL_CAPACITY: usize = 100;

/// What a progress event carries
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressKind {
    /// Human-readable status line
    Status(String),
    /// Completion fraction in `0.0..=1.0`
    Fraction(f64),
    /// Work is running but no fraction can be computed
    Indeterminate,
}

/// A single progress update, optionally tagged with the job it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub job: Option<Arc<str>>,
    pub kind: ProgressKind,
}

/// Receives events from the consumer task, in arrival order
pub trait ProgressObserver: Send + 'static {
    fn on_event(&mut self, event: ProgressEvent);

    /// Called exactly once when a batch has fully drained
    fn on_complete(&mut self, _report: &BatchReport) {}
}

/// Observer that discards everything
#[derive(Debug, Default)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_event(&mut self, _event: ProgressEvent) {}
}

/// Producer half of the progress channel.
///
/// Emission never blocks: when the channel is full the event is dropped.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    job: Option<Arc<str>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx), job: None }
    }

    /// A sink that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Same channel, events tagged with `job`
    pub fn for_job(&self, job: &str) -> Self {
        Self {
            tx: self.tx.clone(),
            job: Some(Arc::from(job)),
        }
    }

    pub fn job(&self) -> Option<&str> {
        self.job.as_deref()
    }

    pub fn emit(&self, kind: ProgressKind) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = ProgressEvent {
            job: self.job.clone(),
            kind,
        };
        if let Err(e) = tx.try_send(event) {
            trace!("Progress event dropped: {}", e);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(ProgressKind::Status(message.into()));
    }

    pub fn fraction(&self, value: f64) {
        self.emit(ProgressKind::Fraction(value.clamp(0.0, 1.0)));
    }

    pub fn indeterminate(&self) {
        self.emit(ProgressKind::Indeterminate);
    }
}

/// Create a bounded progress channel and spawn its single consumer.
///
/// The consumer runs until every sink clone is dropped, then hands the
/// observer back through the join handle.
pub fn spawn_consumer<O: ProgressObserver>(mut observer: O) -> (ProgressSink, JoinHandle<O>) {
    let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            observer.on_event(event);
        }
        observer
    });
    (ProgressSink::new(tx), handle)
}

/// Wall-clock gate for progress emission
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// True on the first call and then at most once per interval
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Format a byte count for status lines ("12.3 MiB")
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
