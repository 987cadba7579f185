use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use harvester_model::{ItemId, JobKey, JobPurpose};
use serde::{Deserialize, Serialize};

/// Structured payload per job kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum JobPayload {
    FetchItem { id: ItemId },
    ComputeEmbedding { id: ItemId },
}

impl JobPayload {
    pub fn item_id(&self) -> ItemId {
        match self {
            JobPayload::FetchItem { id } | JobPayload::ComputeEmbedding { id } => *id,
        }
    }

    pub fn purpose(&self) -> JobPurpose {
        match self {
            JobPayload::FetchItem { .. } => JobPurpose::FetchItem,
            JobPayload::ComputeEmbedding { .. } => JobPurpose::ComputeEmbedding,
        }
    }

    /// Rebuilds the payload from a job key alone. Keys encode both the
    /// purpose and the item, so a record whose payload field is damaged can
    /// still be identified.
    pub fn from_key(key: &JobKey) -> Option<JobPayload> {
        let id = key.item_id()?;
        Some(match key.purpose()? {
            JobPurpose::FetchItem => JobPayload::FetchItem { id },
            JobPurpose::ComputeEmbedding => JobPayload::ComputeEmbedding { id },
        })
    }
}

/// Lifecycle of a job record as the queue sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Failed,
    /// Record exists but could not be decoded.
    Unknown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "finished" => Ok(JobState::Finished),
            "failed" => Ok(JobState::Failed),
            "unknown" => Ok(JobState::Unknown),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// Request to enqueue a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSpec {
    pub key: JobKey,
    pub payload: JobPayload,
    /// How long the record stays visible after finishing successfully.
    pub result_ttl: Duration,
}

impl JobSpec {
    pub fn fetch(id: ItemId, result_ttl: Duration) -> Self {
        Self {
            key: JobKey::fetch(id),
            payload: JobPayload::FetchItem { id },
            result_ttl,
        }
    }

    pub fn embedding(id: ItemId, result_ttl: Duration) -> Self {
        Self {
            key: JobKey::embedding(id),
            payload: JobPayload::ComputeEmbedding { id },
            result_ttl,
        }
    }
}

/// Persisted view of a job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRecord {
    pub key: JobKey,
    pub payload: JobPayload,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result_ttl: Duration,
    pub error: Option<String>,
    /// Times the job has been handed to a worker.
    pub attempts: u32,
    /// Deadline of the current worker's lease while running.
    pub lease_expires_at: Option<DateTime<Utc>>,
}

pub(crate) mod field {
    pub const PAYLOAD: &str = "payload";
    pub const STATE: &str = "state";
    pub const ENQUEUED_AT: &str = "enqueued_at";
    pub const STARTED_AT: &str = "started_at";
    pub const ENDED_AT: &str = "ended_at";
    pub const RESULT_TTL: &str = "result_ttl";
    pub const ERROR: &str = "error";
    pub const ATTEMPTS: &str = "attempts";
    pub const LEASE_EXPIRES_AT: &str = "lease_expires_at";
}

impl JobRecord {
    pub fn queued(spec: JobSpec) -> Self {
        Self {
            key: spec.key,
            payload: spec.payload,
            state: JobState::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            result_ttl: spec.result_ttl,
            error: None,
            attempts: 0,
            lease_expires_at: None,
        }
    }

    /// Stand-in for a record that exists but failed to decode.
    pub fn undecodable(key: JobKey, payload: JobPayload) -> Self {
        Self {
            key,
            payload,
            state: JobState::Unknown,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            result_ttl: Duration::ZERO,
            error: None,
            attempts: 0,
            lease_expires_at: None,
        }
    }

    /// Running, but the worker holding it let its lease lapse.
    pub fn lease_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Running && self.lease_expires_at.is_some_and(|at| at <= now)
    }

    /// Flat field list for the job hash.
    pub fn to_fields(&self) -> serde_json::Result<Vec<(&'static str, String)>> {
        let mut fields = vec![
            (field::PAYLOAD, serde_json::to_string(&self.payload)?),
            (field::STATE, self.state.as_str().to_string()),
            (field::ENQUEUED_AT, self.enqueued_at.to_rfc3339()),
            (field::RESULT_TTL, self.result_ttl.as_secs().to_string()),
            (field::ATTEMPTS, self.attempts.to_string()),
        ];
        if let Some(started) = self.started_at {
            fields.push((field::STARTED_AT, started.to_rfc3339()));
        }
        if let Some(ended) = self.ended_at {
            fields.push((field::ENDED_AT, ended.to_rfc3339()));
        }
        if let Some(lease) = self.lease_expires_at {
            fields.push((field::LEASE_EXPIRES_AT, lease.to_rfc3339()));
        }
        if let Some(error) = &self.error {
            fields.push((field::ERROR, error.clone()));
        }
        Ok(fields)
    }

    pub fn from_fields(key: JobKey, fields: &HashMap<String, String>) -> Result<Self, String> {
        let required = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| format!("missing field '{name}'"))
        };
        let timestamp = |name: &str| -> Result<Option<DateTime<Utc>>, String> {
            fields
                .get(name)
                .map(|raw| {
                    DateTime::parse_from_rfc3339(raw)
                        .map(|ts| ts.with_timezone(&Utc))
                        .map_err(|e| format!("bad '{name}' timestamp: {e}"))
                })
                .transpose()
        };

        let payload: JobPayload = serde_json::from_str(required(field::PAYLOAD)?)
            .map_err(|e| format!("bad payload: {e}"))?;
        let state = required(field::STATE)?.parse()?;
        let enqueued_at =
            timestamp(field::ENQUEUED_AT)?.ok_or_else(|| "missing field 'enqueued_at'".to_string())?;
        let result_ttl = fields
            .get(field::RESULT_TTL)
            .map(|raw| raw.parse::<u64>().map_err(|e| format!("bad result_ttl: {e}")))
            .transpose()?
            .unwrap_or(0);
        let attempts = fields
            .get(field::ATTEMPTS)
            .map(|raw| raw.parse::<u32>().map_err(|e| format!("bad attempts: {e}")))
            .transpose()?
            .unwrap_or(0);

        Ok(Self {
            key,
            payload,
            state,
            enqueued_at,
            started_at: timestamp(field::STARTED_AT)?,
            ended_at: timestamp(field::ENDED_AT)?,
            result_ttl: Duration::from_secs(result_ttl),
            error: fields.get(field::ERROR).cloned(),
            attempts,
            lease_expires_at: timestamp(field::LEASE_EXPIRES_AT)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_survives_hash_encoding() {
        let mut record = JobRecord::queued(JobSpec::embedding(ItemId(77), Duration::from_secs(10)));
        record.state = JobState::Failed;
        record.error = Some("embedding backend timed out".into());
        record.attempts = 3;

        let fields: HashMap<String, String> = record
            .to_fields()
            .expect("encode")
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let decoded = JobRecord::from_fields(record.key.clone(), &fields).expect("decode");

        assert_eq!(decoded.payload, record.payload);
        assert_eq!(decoded.state, JobState::Failed);
        assert_eq!(decoded.result_ttl, Duration::from_secs(10));
        assert_eq!(decoded.error.as_deref(), Some("embedding backend timed out"));
        assert_eq!(decoded.attempts, 3);
    }

    #[test]
    fn only_running_records_past_their_deadline_have_lapsed() {
        let now = Utc::now();
        let mut record = JobRecord::queued(JobSpec::embedding(ItemId(8), Duration::from_secs(10)));
        record.lease_expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!record.lease_lapsed(now));

        record.state = JobState::Running;
        assert!(record.lease_lapsed(now));

        record.lease_expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(!record.lease_lapsed(now));
    }

    #[test]
    fn records_written_before_attempt_tracking_decode_with_zero_attempts() {
        let key = JobKey::fetch(ItemId(12));
        let mut fields = HashMap::new();
        fields.insert(
            field::PAYLOAD.to_string(),
            serde_json::to_string(&JobPayload::FetchItem { id: ItemId(12) }).expect("payload"),
        );
        fields.insert(field::STATE.to_string(), "queued".to_string());
        fields.insert(field::ENQUEUED_AT.to_string(), Utc::now().to_rfc3339());

        let record = JobRecord::from_fields(key, &fields).expect("decode");
        assert_eq!(record.attempts, 0);
        assert_eq!(record.lease_expires_at, None);
    }

    #[test]
    fn damaged_payload_is_reported_and_recoverable_from_key() {
        let key = JobKey::embedding(ItemId(5));
        let mut fields = HashMap::new();
        fields.insert(field::PAYLOAD.to_string(), "{not json".to_string());
        fields.insert(field::STATE.to_string(), "queued".to_string());

        assert!(JobRecord::from_fields(key.clone(), &fields).is_err());
        assert_eq!(
            JobPayload::from_key(&key),
            Some(JobPayload::ComputeEmbedding { id: ItemId(5) })
        );
    }
}
