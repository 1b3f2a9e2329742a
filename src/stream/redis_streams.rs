//! Redis Streams reader

use crate::config::RedisConfig;
use crate::error::LogError;
use crate::stream::TransactionLog;
use crate::types::record::{LogEntry, RawRecord, StreamPosition};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{info, warn};

/// Reads a Redis stream one entry at a time with `XREAD BLOCK`
pub struct RedisLog {
    client: redis::Client,
    /// Dropped on connection errors until [`TransactionLog::reconnect`] succeeds
    conn: Option<MultiplexedConnection>,
    stream_key: String,
    block_ms: usize,
}

impl RedisLog {
    /// Connect and verify the server answers `PING`
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .with_context(|| format!("Invalid Redis url {}", config.url))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Redis connection failed")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis ping failed")?;

        info!(url = %config.url, stream = %config.stream_key, "Connected to Redis");

        Ok(Self {
            client,
            conn: Some(conn),
            stream_key: config.stream_key.clone(),
            block_ms: config.block_ms as usize,
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }
}

#[async_trait]
impl TransactionLog for RedisLog {
    async fn read_after(
        &mut self,
        position: StreamPosition,
    ) -> Result<Option<LogEntry>, LogError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| LogError::Connection("not connected".into()))?;

        let options = StreamReadOptions::default().count(1).block(self.block_ms);
        let result: redis::RedisResult<Option<StreamReadReply>> = conn
            .xread_options(&[self.stream_key.as_str()], &[position.to_string()], &options)
            .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                self.conn = None;
                return Err(LogError::Connection(e.to_string()));
            }
        };

        let Some(entry) = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .next()
        else {
            return Ok(None);
        };

        decode_entry(entry).map(Some)
    }

    async fn reconnect(&mut self) -> Result<(), LogError> {
        self.conn = None;
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;
        self.conn = Some(conn);
        info!(stream = %self.stream_key, "Reconnected to Redis");
        Ok(())
    }
}

/// Convert a stream entry into a log entry; fields whose values are not
/// strings are dropped so validation reports them as missing
fn decode_entry(entry: StreamId) -> Result<LogEntry, LogError> {
    let position: StreamPosition = entry.id.parse()?;

    let mut record = RawRecord::new();
    for (field, value) in entry.map {
        match redis::from_redis_value::<String>(&value) {
            Ok(value) => record.insert(field, value),
            Err(e) => warn!(
                stream_id = %position,
                field = %field,
                error = %e,
                "Dropping non-string field"
            ),
        }
    }

    Ok(LogEntry { position, record })
}
