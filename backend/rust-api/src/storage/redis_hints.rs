use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;

use super::{HintUsageStore, StoreError};

const HINT_USAGE_TTL_SECONDS: u64 = 7 * 24 * 3600;

// Check and increment in one round-trip so concurrent reveals cannot pass the cap
const INCREMENT_IF_BELOW: &str = r#"
    local key = KEYS[1]
    local field = ARGV[1]
    local cap = tonumber(ARGV[2])

    local current = tonumber(redis.call('HGET', key, field) or '0')
    if current >= cap then
        return -1
    end

    local used = redis.call('HINCRBY', key, field, 1)
    redis.call('EXPIRE', key, ARGV[3])

    return used
"#;

/// Hint usage kept in one Redis hash per attempt, keyed by question id.
pub struct RedisHintStore {
    redis: ConnectionManager,
}

impl RedisHintStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(attempt_id: &str) -> String {
        format!("attempt_hints:{}", attempt_id)
    }
}

#[async_trait]
impl HintUsageStore for RedisHintStore {
    async fn increment_if_below(
        &self,
        attempt_id: &str,
        question_id: &str,
        cap: u32,
    ) -> Result<Option<u32>, StoreError> {
        let mut conn = self.redis.clone();

        let used: i64 = redis::Script::new(INCREMENT_IF_BELOW)
            .key(Self::key(attempt_id))
            .arg(question_id)
            .arg(cap)
            .arg(HINT_USAGE_TTL_SECONDS)
            .invoke_async(&mut conn)
            .await
            .context("Failed to execute hint ledger Lua script")?;

        Ok(u32::try_from(used).ok())
    }

    async fn usage(&self, attempt_id: &str) -> Result<HashMap<String, u32>, StoreError> {
        let mut conn = self.redis.clone();

        let usage: HashMap<String, u32> = redis::cmd("HGETALL")
            .arg(Self::key(attempt_id))
            .query_async(&mut conn)
            .await
            .context("Failed to read hint usage")?;

        Ok(usage)
    }
}
