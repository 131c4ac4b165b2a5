use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;

use super::{ClockError, ServerClock};

/// Redis `TIME` as the shared authoritative clock.
pub struct RedisServerClock {
    redis: ConnectionManager,
}

impl RedisServerClock {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl ServerClock for RedisServerClock {
    async fn now(&self) -> Result<DateTime<Utc>, ClockError> {
        let mut conn = self.redis.clone();

        let (secs, micros): (String, String) = redis::cmd("TIME")
            .query_async(&mut conn)
            .await
            .context("Failed to read Redis TIME")?;

        let secs: i64 = secs.parse().context("Invalid TIME seconds")?;
        let micros: u32 = micros.parse().context("Invalid TIME microseconds")?;

        let now = DateTime::from_timestamp(secs, micros * 1000)
            .ok_or_else(|| anyhow!("Redis TIME out of range: {}s", secs))?;
        Ok(now)
    }
}
