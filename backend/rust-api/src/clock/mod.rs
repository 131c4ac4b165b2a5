//! Time sources. Deadline math only ever uses [`DriftCorrector::corrected_now`],
//! never the raw local clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod drift;
pub mod manual;
pub mod redis_time;

pub use drift::DriftCorrector;
pub use manual::ManualClock;
pub use redis_time::RedisServerClock;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("server clock unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// Authoritative time, queried on demand. May be unreachable.
#[async_trait]
pub trait ServerClock: Send + Sync {
    async fn now(&self) -> Result<DateTime<Utc>, ClockError>;
}

/// The device clock the process runs on.
pub trait LocalClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl LocalClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Used as the server clock when no shared time source is configured.
#[async_trait]
impl ServerClock for SystemClock {
    async fn now(&self) -> Result<DateTime<Utc>, ClockError> {
        Ok(Utc::now())
    }
}
