use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvester_model::JobKey;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::job::{JobPayload, JobRecord, JobSpec, JobState, field};
use super::WorkQueue;
use crate::error::{HarvestError, Result};
use crate::redis_io::{self, bounded};

/// Retention for records that could not be decoded when popped.
const UNDECODABLE_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Requeues due retries and lapsed leases, then pops and leases the first
/// entry that still points at a queued record.
fn dequeue_script() -> Script {
    Script::new(
        r#"
        local pending = KEYS[1]
        local leased = KEYS[2]
        local deferred = KEYS[3]
        local prefix = ARGV[1]
        local now = ARGV[2]

        for _, key in ipairs(redis.call('ZRANGEBYSCORE', deferred, '-inf', now)) do
            redis.call('ZREM', deferred, key)
            redis.call('RPUSH', pending, key)
        end

        for _, key in ipairs(redis.call('ZRANGEBYSCORE', leased, '-inf', now)) do
            redis.call('ZREM', leased, key)
            local hash = prefix .. key
            if redis.call('HGET', hash, 'state') == 'running' then
                redis.call('HSET', hash, 'state', 'queued', 'error', 'lease expired')
                redis.call('HDEL', hash, 'started_at', 'lease_expires_at')
                redis.call('RPUSH', pending, key)
            end
        end

        while true do
            local key = redis.call('LPOP', pending)
            if not key then
                return false
            end
            local hash = prefix .. key
            local state = redis.call('HGET', hash, 'state')
            if redis.call('EXISTS', hash) == 1
                and state ~= 'running' and state ~= 'finished' and state ~= 'failed' then
                redis.call('HINCRBY', hash, 'attempts', 1)
                redis.call('HSET', hash, 'state', 'running', 'started_at', ARGV[4],
                    'lease_expires_at', ARGV[5])
                redis.call('ZADD', leased, ARGV[3], key)
                return key
            end
        end
        "#,
    )
}

/// Puts a leased job back as queued behind a delay. Terminal or missing
/// records are left alone.
fn retry_script() -> Script {
    Script::new(
        r#"
        local hash = KEYS[1]
        local state = redis.call('HGET', hash, 'state')
        if not state or state == 'finished' or state == 'failed' then
            return 0
        end
        redis.call('HSET', hash, 'state', 'queued', 'error', ARGV[2])
        redis.call('HDEL', hash, 'started_at', 'lease_expires_at')
        redis.call('ZREM', KEYS[2], ARGV[1])
        redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
        return 1
        "#,
    )
}

fn epoch_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Upper bound for lease and retry delays, keeping deadlines in RFC 3339
/// range.
const LONGEST_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl.min(LONGEST_DELAY))
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(now)
}

/// [`WorkQueue`] on top of Redis.
///
/// Each job is a hash under `<namespace>:job:<key>`. Pending keys sit in the
/// list `<namespace>:queue:default`; leased keys in the sorted set
/// `<namespace>:queue:leased` scored by lease deadline; retries waiting out
/// their delay in `<namespace>:queue:deferred` scored by due time. Writes
/// touching more than one of these go through a `MULTI`/`EXEC` pipeline or a
/// script.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    namespace: String,
    op_timeout: Duration,
    dequeue: Script,
    retry: Script,
}

impl fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("connection", &"ConnectionManager")
            .field("namespace", &self.namespace)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

fn queue_error(message: String) -> HarvestError {
    HarvestError::QueueUnavailable(message)
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str, namespace: &str, op_timeout: Duration) -> Result<Self> {
        let conn = redis_io::connect(redis_url).await?;
        Ok(Self::from_manager(conn, namespace, op_timeout))
    }

    pub fn from_manager(conn: ConnectionManager, namespace: &str, op_timeout: Duration) -> Self {
        Self {
            conn,
            namespace: namespace.to_string(),
            op_timeout,
            dequeue: dequeue_script(),
            retry: retry_script(),
        }
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn job_prefix(&self) -> String {
        format!("{}:job:", self.namespace)
    }

    fn job_key(&self, key: &JobKey) -> String {
        format!("{}{}", self.job_prefix(), key)
    }

    fn list_key(&self) -> String {
        format!("{}:queue:default", self.namespace)
    }

    fn leased_key(&self) -> String {
        format!("{}:queue:leased", self.namespace)
    }

    fn deferred_key(&self) -> String {
        format!("{}:queue:deferred", self.namespace)
    }

    fn decode(&self, key: JobKey, fields: &HashMap<String, String>) -> Option<JobRecord> {
        if fields.is_empty() {
            return None;
        }
        match JobRecord::from_fields(key.clone(), fields) {
            Ok(record) => Some(record),
            Err(reason) => {
                warn!(target: "harvest::queue", job = %key, %reason, "undecodable job record");
                JobPayload::from_key(&key).map(|payload| JobRecord::undecodable(key, payload))
            }
        }
    }

    /// Sets terminal state fields, drops the lease and applies retention in
    /// one transaction.
    async fn finish(
        &self,
        key: &JobKey,
        state: JobState,
        error: Option<&str>,
        ttl: Duration,
    ) -> Result<()> {
        let hash = self.job_key(key);
        let mut pipe = redis::pipe();
        pipe.atomic();

        let hset = pipe
            .cmd("HSET")
            .arg(&hash)
            .arg(field::STATE)
            .arg(state.as_str())
            .arg(field::ENDED_AT)
            .arg(Utc::now().to_rfc3339());
        if let Some(error) = error {
            hset.arg(field::ERROR).arg(error);
        }
        hset.ignore();
        pipe.cmd("HDEL")
            .arg(&hash)
            .arg(field::LEASE_EXPIRES_AT)
            .ignore();
        pipe.cmd("ZREM")
            .arg(self.leased_key())
            .arg(key.as_str())
            .ignore();
        pipe.cmd("ZREM")
            .arg(self.deferred_key())
            .arg(key.as_str())
            .ignore();

        if ttl.is_zero() {
            pipe.cmd("DEL").arg(&hash).ignore();
        } else {
            pipe.cmd("EXPIRE").arg(&hash).arg(ttl.as_secs().max(1)).ignore();
        }

        let mut conn = self.conn.clone();
        bounded(
            self.op_timeout,
            "finish job",
            queue_error,
            pipe.query_async::<()>(&mut conn),
        )
        .await
    }
}

#[async_trait]
impl WorkQueue for RedisJobQueue {
    async fn enqueue_many(&self, jobs: Vec<JobSpec>) -> Result<usize> {
        if jobs.is_empty() {
            return Ok(0);
        }

        let count = jobs.len();
        let list = self.list_key();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for spec in jobs {
            let record = JobRecord::queued(spec);
            let hash = self.job_key(&record.key);
            pipe.cmd("DEL").arg(&hash).ignore();
            let hset = pipe.cmd("HSET").arg(&hash);
            for (name, value) in record.to_fields()? {
                hset.arg(name).arg(value);
            }
            hset.ignore();
            pipe.cmd("RPUSH").arg(&list).arg(record.key.as_str()).ignore();
        }

        let mut conn = self.conn.clone();
        bounded(
            self.op_timeout,
            "enqueue",
            queue_error,
            pipe.query_async::<()>(&mut conn),
        )
        .await?;

        debug!(target: "harvest::queue", count, "enqueued jobs");
        Ok(count)
    }

    async fn fetch_jobs(&self, keys: &[JobKey]) -> Result<Vec<Option<JobRecord>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HGETALL").arg(self.job_key(key));
        }

        let mut conn = self.conn.clone();
        let hashes = bounded(
            self.op_timeout,
            "fetch jobs",
            queue_error,
            pipe.query_async::<Vec<HashMap<String, String>>>(&mut conn),
        )
        .await?;

        if hashes.len() != keys.len() {
            return Err(HarvestError::QueueUnavailable(format!(
                "Redis returned {} job records for {} keys",
                hashes.len(),
                keys.len()
            )));
        }

        Ok(keys
            .iter()
            .zip(hashes)
            .map(|(key, fields)| self.decode(key.clone(), &fields))
            .collect())
    }

    async fn dequeue(&self, lease_ttl: Duration) -> Result<Option<JobRecord>> {
        loop {
            let now = Utc::now();
            let lease_until = after(now, lease_ttl);
            let mut conn = self.conn.clone();

            let mut invocation = self.dequeue.prepare_invoke();
            invocation
                .key(self.list_key())
                .key(self.leased_key())
                .key(self.deferred_key())
                .arg(self.job_prefix())
                .arg(epoch_millis(now))
                .arg(epoch_millis(lease_until))
                .arg(now.to_rfc3339())
                .arg(lease_until.to_rfc3339());
            let popped = bounded(
                self.op_timeout,
                "dequeue",
                queue_error,
                invocation.invoke_async::<Option<String>>(&mut conn),
            )
            .await?;

            let Some(raw_key) = popped else {
                return Ok(None);
            };
            let key = match raw_key.parse::<JobKey>() {
                Ok(key) => key,
                Err(e) => {
                    warn!(target: "harvest::queue", "dropping foreign queue entry: {e}");
                    let mut forget = redis::cmd("ZREM");
                    forget.arg(self.leased_key()).arg(&raw_key);
                    bounded(
                        self.op_timeout,
                        "ZREM",
                        queue_error,
                        forget.query_async::<()>(&mut conn),
                    )
                    .await?;
                    continue;
                }
            };

            // The lease is already held; a failure from here on is recovered
            // once it lapses.
            let mut load = redis::cmd("HGETALL");
            load.arg(self.job_key(&key));
            let fields = bounded(
                self.op_timeout,
                "HGETALL",
                queue_error,
                load.query_async::<HashMap<String, String>>(&mut conn),
            )
            .await?;

            let Some(record) = self.decode(key.clone(), &fields) else {
                debug!(target: "harvest::queue", job = %key, "leased job record vanished");
                continue;
            };

            if record.state == JobState::Unknown {
                self.finish(
                    &key,
                    JobState::Failed,
                    Some("undecodable job record"),
                    UNDECODABLE_RECORD_TTL,
                )
                .await?;
                continue;
            }

            return Ok(Some(record));
        }
    }

    async fn complete(&self, key: &JobKey, result_ttl: Duration) -> Result<()> {
        self.finish(key, JobState::Finished, None, result_ttl).await
    }

    async fn fail(&self, key: &JobKey, error: &str, failure_ttl: Duration) -> Result<()> {
        self.finish(key, JobState::Failed, Some(error), failure_ttl)
            .await
    }

    async fn retry(&self, key: &JobKey, error: &str, delay: Duration) -> Result<()> {
        let due = after(Utc::now(), delay);
        let mut conn = self.conn.clone();
        let mut invocation = self.retry.prepare_invoke();
        invocation
            .key(self.job_key(key))
            .key(self.leased_key())
            .key(self.deferred_key())
            .arg(key.as_str())
            .arg(error)
            .arg(epoch_millis(due));
        let moved = bounded(
            self.op_timeout,
            "retry job",
            queue_error,
            invocation.invoke_async::<i64>(&mut conn),
        )
        .await?;

        if moved == 0 {
            debug!(target: "harvest::queue", job = %key, "retry skipped; record already settled");
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("LLEN");
        cmd.arg(self.list_key());
        bounded(
            self.op_timeout,
            "LLEN",
            queue_error,
            cmd.query_async::<usize>(&mut conn),
        )
        .await
    }
}
