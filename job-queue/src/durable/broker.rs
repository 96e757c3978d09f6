use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::utils::config::AppConfig;
use redis::{aio::MultiplexedConnection, AsyncCommands, ConnectionAddr, ConnectionInfo};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    error::JobError,
    executor::ProcessOutcome,
    job::{FileJobPayload, Job},
};

const KEY_PREFIX: &str = "jobq";

/// Where and how to reach the broker.
#[derive(Clone, Debug)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub queue_name: String,
    pub connect_timeout: Duration,
}

impl BrokerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            host: config.redis_host.clone(),
            port: config.redis_port,
            password: config.redis_password.clone(),
            queue_name: config.queue_name.clone(),
            connect_timeout: Duration::from_millis(config.broker_connect_timeout_ms),
        }
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: redis::RedisConnectionInfo {
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Broker operations the durable queue relies on. Persistence, acknowledgement and
/// redelivery are the broker's business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Round-trips to the broker to prove it is reachable.
    async fn ping(&self) -> Result<(), JobError>;

    /// Durably stores a job and returns it with its broker-assigned id.
    async fn add(&self, job_name: &str, payload: &FileJobPayload) -> Result<Job, JobError>;

    /// Waits up to `block_for` for the next job and marks it active.
    async fn reserve(&self, block_for: Duration) -> Result<Option<Reservation>, JobError>;

    /// Records the completion value and acknowledges the job.
    async fn complete(&self, job: &Job, result: &ProcessOutcome) -> Result<(), JobError>;

    /// Records the failure reason and acknowledges the job.
    async fn fail(&self, job: &Job, reason: &str) -> Result<(), JobError>;

    /// Fails a reserved id whose stored job could not be read back.
    async fn reject(&self, id: &str, reason: &str) -> Result<(), JobError>;
}

/// What a consumer gets back from [`JobBroker::reserve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    Job(Job),
    /// The id was moved to `active` but its stored job is missing or malformed.
    Unreadable { id: String, reason: String },
}

/// Redis-backed broker using the reliable-queue pattern.
///
/// Keys for queue `Q`:
/// * `jobq:Q:id` counter for job ids
/// * `jobq:Q:job:<id>` hash with `name`, `data`, `state`, `enqueuedAt`,
///   `returnvalue`, `failedReason`, `finishedOn`
/// * `jobq:Q:wait` pending ids, `jobq:Q:active` ids handed to a consumer
/// * `jobq:Q:completed` / `jobq:Q:failed` finished ids
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
    /// Separate connection for blocking pops so they never stall regular commands.
    blocking: Mutex<Option<MultiplexedConnection>>,
    queue_name: String,
}

impl RedisBroker {
    /// Opens a connection, failing fast with `BrokerUnavailable`.
    pub async fn connect(settings: &BrokerSettings) -> Result<Self, JobError> {
        let client = redis::Client::open(settings.connection_info())
            .map_err(|e| JobError::BrokerUnavailable(e.to_string()))?;

        let conn = tokio::time::timeout(
            settings.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            JobError::BrokerUnavailable(format!(
                "timed out connecting to {}",
                settings.address()
            ))
        })?
        .map_err(|e| JobError::BrokerUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(None),
            queue_name: settings.queue_name.clone(),
        })
    }

    fn key(&self, part: &str) -> String {
        format!("{KEY_PREFIX}:{}:{part}", self.queue_name)
    }

    fn job_key(&self, id: &str) -> String {
        self.key(&format!("job:{id}"))
    }

    async fn pop_next_id(&self, block_for: Duration) -> Result<Option<String>, JobError> {
        let mut guard = self.blocking.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_multiplexed_async_connection().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(JobError::Broker("blocking connection unavailable".into()));
        };

        let id: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(self.key("wait"))
            .arg(self.key("active"))
            .arg(block_for.as_secs().max(1))
            .query_async(conn)
            .await?;

        Ok(id)
    }

    async fn finish(
        &self,
        id: &str,
        state: &str,
        field: &str,
        value: &str,
        list: &str,
    ) -> Result<(), JobError> {
        let mut conn = self.conn.clone();
        let finished_on = Utc::now().to_rfc3339();

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                self.job_key(id),
                &[("state", state), (field, value), ("finishedOn", finished_on.as_str())],
            )
            .ignore()
            .lrem(self.key("active"), 1, id)
            .ignore()
            .lpush(self.key(list), id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }
}

/// Rebuilds a job from its stored hash; a `waiting` job surfaces as `queued`.
fn job_from_hash(id: &str, fields: &HashMap<String, String>) -> Result<Job, JobError> {
    let name = fields
        .get("name")
        .ok_or_else(|| JobError::Broker(format!("job {id} has no name")))?;
    let data = fields
        .get("data")
        .ok_or_else(|| JobError::Broker(format!("job {id} has no data")))?;
    let payload: FileJobPayload = serde_json::from_str(data)?;

    let mut job = Job::new(id.to_string(), name, payload);
    if let Some(enqueued_at) = fields
        .get("enqueuedAt")
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    {
        job.enqueued_at = enqueued_at.with_timezone(&Utc);
    }

    Ok(job)
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn ping(&self) -> Result<(), JobError> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn add(&self, job_name: &str, payload: &FileJobPayload) -> Result<Job, JobError> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(self.key("id"), 1).await?;

        let job = Job::new(id.to_string(), job_name, payload.clone());
        let data = serde_json::to_string(payload)?;
        let enqueued_at = job.enqueued_at.to_rfc3339();

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                self.job_key(&job.id),
                &[
                    ("name", job_name),
                    ("data", data.as_str()),
                    ("state", "waiting"),
                    ("enqueuedAt", enqueued_at.as_str()),
                ],
            )
            .ignore()
            .lpush(self.key("wait"), &job.id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(job)
    }

    async fn reserve(&self, block_for: Duration) -> Result<Option<Reservation>, JobError> {
        let Some(id) = self.pop_next_id(block_for).await? else {
            return Ok(None);
        };

        let mut conn = self.conn.clone();
        let job_key = self.job_key(&id);
        let fields: HashMap<String, String> = conn.hgetall(&job_key).await?;

        let decoded = if fields.is_empty() {
            Err(JobError::Broker(format!("job {id} has no stored data")))
        } else {
            job_from_hash(&id, &fields)
        };

        match decoded {
            Ok(job) => {
                let _: () = conn.hset(&job_key, "state", "active").await?;
                Ok(Some(Reservation::Job(job)))
            }
            Err(err) => {
                warn!(queue = %self.queue_name, job_id = %id, error = %err, "reserved job is unreadable");
                Ok(Some(Reservation::Unreadable {
                    id,
                    reason: err.to_string(),
                }))
            }
        }
    }

    async fn complete(&self, job: &Job, result: &ProcessOutcome) -> Result<(), JobError> {
        let value = serde_json::to_string(result)?;
        self.finish(&job.id, "completed", "returnvalue", &value, "completed")
            .await
    }

    async fn fail(&self, job: &Job, reason: &str) -> Result<(), JobError> {
        self.finish(&job.id, "failed", "failedReason", reason, "failed")
            .await
    }

    async fn reject(&self, id: &str, reason: &str) -> Result<(), JobError> {
        self.finish(id, "failed", "failedReason", reason, "failed")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, PROCESS_FILE_JOB};

    #[test]
    fn test_settings_from_config() {
        let config = AppConfig {
            redis_host: "broker.internal".into(),
            redis_port: 6380,
            redis_password: Some("p@ss:word".into()),
            broker_connect_timeout_ms: 250,
            ..Default::default()
        };

        let settings = BrokerSettings::from_config(&config);
        let info = settings.connection_info();

        assert_eq!(settings.address(), "broker.internal:6380");
        assert_eq!(settings.queue_name, "fileProcessing");
        assert_eq!(settings.connect_timeout, Duration::from_millis(250));
        assert_eq!(info.redis.password.as_deref(), Some("p@ss:word"));
        assert!(matches!(
            info.addr,
            ConnectionAddr::Tcp(ref host, 6380) if host == "broker.internal"
        ));
    }

    #[test]
    fn test_job_from_hash() {
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), PROCESS_FILE_JOB.to_string());
        fields.insert(
            "data".to_string(),
            r#"{"fileId":42,"filePath":"uploads/42-test.txt"}"#.to_string(),
        );
        fields.insert(
            "enqueuedAt".to_string(),
            "2024-01-02T03:04:05+00:00".to_string(),
        );
        fields.insert("state".to_string(), "waiting".to_string());

        let job = job_from_hash("17", &fields).expect("job");

        assert_eq!(job.id, "17");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.payload.file_id, 42);
        assert_eq!(job.enqueued_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_job_from_hash_requires_data() {
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), PROCESS_FILE_JOB.to_string());

        assert!(matches!(
            job_from_hash("1", &fields),
            Err(JobError::Broker(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_broker_unavailable() {
        let settings = BrokerSettings {
            host: "127.0.0.1".into(),
            port: 1,
            password: None,
            queue_name: "fileProcessing".into(),
            connect_timeout: Duration::from_millis(500),
        };

        let result = RedisBroker::connect(&settings).await;

        assert!(matches!(result, Err(JobError::BrokerUnavailable(_))));
    }
}
