use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Upstream upload limit; files past this size never reach the job queue.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    #[serde(default)]
    pub redis_password: Option<String>,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default = "default_broker_connect_timeout_ms")]
    pub broker_connect_timeout_ms: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Whether a successful upload dispatches a `processFile` job.
    #[serde(default = "default_enqueue_on_upload")]
    pub enqueue_on_upload: bool,
    #[serde(default)]
    pub bootstrap_api_key: Option<String>,
}

fn default_http_port() -> u16 {
    3000
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_queue_name() -> String {
    "fileProcessing".to_string()
}

fn default_broker_connect_timeout_ms() -> u64 {
    2000
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_enqueue_on_upload() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "test".to_string(),
            surrealdb_database: "test".to_string(),
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_password: None,
            queue_name: default_queue_name(),
            broker_connect_timeout_ms: default_broker_connect_timeout_ms(),
            max_upload_bytes: default_max_upload_bytes(),
            enqueue_on_upload: default_enqueue_on_upload(),
            bootstrap_api_key: None,
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
