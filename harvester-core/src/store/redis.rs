use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Value, aio::ConnectionManager};
use tracing::debug;

use super::{KeyedStore, PipelineCommand, PipelineReply, ScanPage, StorePipeline};
use crate::error::{HarvestError, Result};
use crate::redis_io::{self, bounded};

/// [`KeyedStore`] backed by one Redis database.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl RedisStore {
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> Result<Self> {
        let conn = redis_io::connect(redis_url).await?;
        Ok(Self::from_manager(conn, op_timeout))
    }

    /// Wraps an existing connection, e.g. the queue database connection
    /// when the watermark lives next to the jobs.
    pub fn from_manager(conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self { conn, op_timeout }
    }
}

fn store_error(message: String) -> HarvestError {
    HarvestError::StoreUnavailable(message)
}

fn exists_reply(value: Value) -> PipelineReply {
    match value {
        Value::Int(flag) => PipelineReply::Exists(flag != 0),
        Value::Boolean(flag) => PipelineReply::Exists(flag),
        other => PipelineReply::Unreadable(format!("expected integer, got {other:?}")),
    }
}

fn value_reply(value: Value) -> PipelineReply {
    match value {
        Value::Nil => PipelineReply::Value(None),
        Value::BulkString(bytes) => PipelineReply::Value(Some(bytes)),
        Value::SimpleString(text) => PipelineReply::Value(Some(text.into_bytes())),
        Value::Int(number) => PipelineReply::Value(Some(number.to_string().into_bytes())),
        other => PipelineReply::Unreadable(format!("expected bulk string, got {other:?}")),
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        bounded(self.op_timeout, "GET", store_error, conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        bounded(
            self.op_timeout,
            "SET",
            store_error,
            conn.set::<_, _, ()>(key, value),
        )
        .await
    }

    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(*field);
        }
        bounded(
            self.op_timeout,
            "HMGET",
            store_error,
            cmd.query_async::<Vec<Option<Vec<u8>>>>(&mut conn),
        )
        .await
    }

    async fn hash_set(&self, key: &str, mapping: &[(&str, Vec<u8>)]) -> Result<()> {
        if mapping.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in mapping {
            cmd.arg(*field).arg(value);
        }
        bounded(
            self.op_timeout,
            "HSET",
            store_error,
            cmd.query_async::<()>(&mut conn),
        )
        .await
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        bounded(
            self.op_timeout,
            "HEXISTS",
            store_error,
            conn.hexists(key, field),
        )
        .await
    }

    async fn scan(&self, cursor: u64, page_size: usize, pattern: &str) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(page_size.max(1));

        let (next, keys) = bounded(
            self.op_timeout,
            "SCAN",
            store_error,
            cmd.query_async::<(u64, Vec<String>)>(&mut conn),
        )
        .await?;

        debug!(cursor, next, keys = keys.len(), "scan page");
        Ok(ScanPage { cursor: next, keys })
    }

    async fn execute(&self, pipeline: StorePipeline) -> Result<Vec<PipelineReply>> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }

        let commands = pipeline.into_commands();
        let mut pipe = redis::pipe();
        for command in &commands {
            match command {
                PipelineCommand::HashExists { key, field } => {
                    pipe.cmd("HEXISTS").arg(key).arg(field);
                }
                PipelineCommand::HashGet { key, field } => {
                    pipe.cmd("HGET").arg(key).arg(field);
                }
            }
        }

        let mut conn = self.conn.clone();
        let raw = bounded(
            self.op_timeout,
            "pipeline",
            store_error,
            pipe.query_async::<Vec<Value>>(&mut conn),
        )
        .await?;

        if raw.len() != commands.len() {
            return Err(HarvestError::StoreUnavailable(format!(
                "Redis pipeline returned {} replies for {} commands",
                raw.len(),
                commands.len()
            )));
        }

        Ok(commands
            .iter()
            .zip(raw)
            .map(|(command, value)| match command {
                PipelineCommand::HashExists { .. } => exists_reply(value),
                PipelineCommand::HashGet { .. } => value_reply(value),
            })
            .collect())
    }
}
