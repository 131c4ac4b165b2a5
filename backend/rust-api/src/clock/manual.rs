use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{ClockError, LocalClock, ServerClock};

/// Hand-driven clock. Clones share the same time, so a test can keep a handle
/// while the engine owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
    available: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
            available: Arc::new(AtomicBool::new(true)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn current(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: TimeDelta) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(TimeDelta::seconds(secs));
    }

    /// When unavailable, reads as a server clock fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of server-clock reads so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl LocalClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.current()
    }
}

#[async_trait]
impl ServerClock for ManualClock {
    async fn now(&self) -> Result<DateTime<Utc>, ClockError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(ClockError::Unavailable(anyhow::anyhow!(
                "manual clock marked unavailable"
            )));
        }
        Ok(self.current())
    }
}
