use async_trait::async_trait;
use chrono::Duration;
use glow_order::{PendingSale, PendingSaleStore, StoreError};
use redis::AsyncCommands;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

fn sale_key(id: Uuid) -> String {
    format!("sale:{}", id)
}

fn attempts_key(id: Uuid) -> String {
    format!("sale:{}:attempts", id)
}

/// Bumps the attempt counter only while the sale itself is still stored,
/// and lets the counter expire with it.
const RECORD_ATTEMPT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return false
end
local n = redis.call('INCR', KEYS[2])
if n == 1 then
    local ttl = redis.call('PTTL', KEYS[1])
    if ttl > 0 then
        redis.call('PEXPIRE', KEYS[2], ttl)
    end
end
return n
";

fn redis_err(e: redis::RedisError) -> StoreError {
    StoreError::Database(format!("redis: {}", e))
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

fn decode(raw: Option<String>) -> Result<Option<PendingSale>, StoreError> {
    raw.map(|json| serde_json::from_str(&json).map_err(|e| StoreError::Corrupt(format!("pending sale: {}", e))))
        .transpose()
}

#[async_trait]
impl PendingSaleStore for RedisClient {
    async fn put(&self, sale: &PendingSale, ttl: Duration) -> Result<(), StoreError> {
        // Redis rejects EX 0
        let seconds = u64::try_from(ttl.num_seconds()).unwrap_or(0).max(1);
        let payload = serde_json::to_string(sale).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(redis_err)?;
        conn.set_ex::<_, _, ()>(sale_key(sale.id), payload, seconds)
            .await
            .map_err(redis_err)?;
        info!("Pending sale stored: {} (ttl {}s)", sale.id, seconds);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PendingSale>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(redis_err)?;
        let raw: Option<String> = conn.get(sale_key(id)).await.map_err(redis_err)?;
        decode(raw)
    }

    async fn take(&self, id: Uuid) -> Result<Option<PendingSale>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(redis_err)?;
        // GETDEL is atomic: two confirmations racing on one sale cannot both see it
        let (raw,): (Option<String>,) = redis::pipe()
            .atomic()
            .cmd("GETDEL")
            .arg(sale_key(id))
            .cmd("DEL")
            .arg(attempts_key(id))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;
        decode(raw)
    }

    async fn record_attempt(&self, id: Uuid) -> Result<Option<u32>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(redis_err)?;
        redis::Script::new(RECORD_ATTEMPT_SCRIPT)
            .key(sale_key(id))
            .key(attempts_key(id))
            .invoke_async::<Option<u32>>(&mut conn)
            .await
            .map_err(redis_err)
    }
}
