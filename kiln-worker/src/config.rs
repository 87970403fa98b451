//! Worker configuration
//!
//! Defines all configurable parameters for the worker: broker connection,
//! queue names, prefetch, working directory and object store settings.

use std::fmt;
use std::path::PathBuf;

use kiln_client::{BrokerSettings, StorageSettings, Topology};

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker instance, used as consumer tag
    pub worker_id: String,

    /// Broker connection settings
    pub broker: BrokerSettings,

    /// Durable queue carrying build commands
    pub commands_queue: String,

    /// Durable queue receiving status events
    pub results_queue: String,

    /// Maximum number of unacknowledged commands held at once
    pub prefetch_count: u16,

    /// Root under which per-build working directories are created
    pub work_dir: PathBuf,

    /// Object store settings
    pub storage: StorageSettings,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String) -> Self {
        Self {
            worker_id,
            broker: BrokerSettings {
                host: "localhost".to_string(),
                port: 5672,
                username: "guest".to_string(),
                password: "guest".to_string(),
                vhost: "/".to_string(),
            },
            commands_queue: "build.commands".to_string(),
            results_queue: "build.results".to_string(),
            prefetch_count: 1,
            work_dir: std::env::temp_dir().join("kiln-builds"),
            storage: StorageSettings {
                endpoint: None,
                region: "us-east-1".to_string(),
                bucket: "artifacts".to_string(),
                access_key_id: None,
                secret_access_key: None,
            },
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - WORKER_ID (default: random UUID)
    /// - AMQP_HOST, AMQP_PORT, AMQP_USERNAME, AMQP_PASSWORD, AMQP_VHOST
    /// - COMMANDS_QUEUE (default: build.commands)
    /// - RESULTS_QUEUE (default: build.results)
    /// - PREFETCH_COUNT (default: 1)
    /// - WORK_DIR (default: <tmp>/kiln-builds)
    /// - S3_ENDPOINT, S3_REGION, S3_BUCKET, S3_ACCESS_KEY_ID, S3_SECRET_ACCESS_KEY
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let worker_id = var("WORKER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut config = Self::new(worker_id);

        if let Some(host) = var("AMQP_HOST") {
            config.broker.host = host;
        }
        if let Some(port) = var("AMQP_PORT") {
            config.broker.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("AMQP_PORT must be a port number, got '{}'", port))?;
        }
        if let Some(username) = var("AMQP_USERNAME") {
            config.broker.username = username;
        }
        if let Some(password) = lookup("AMQP_PASSWORD") {
            config.broker.password = password;
        }
        if let Some(vhost) = var("AMQP_VHOST") {
            config.broker.vhost = vhost;
        }

        if let Some(queue) = var("COMMANDS_QUEUE") {
            config.commands_queue = queue;
        }
        if let Some(queue) = var("RESULTS_QUEUE") {
            config.results_queue = queue;
        }
        if let Some(prefetch) = var("PREFETCH_COUNT") {
            config.prefetch_count = prefetch.parse().map_err(|_| {
                anyhow::anyhow!("PREFETCH_COUNT must be a number, got '{}'", prefetch)
            })?;
        }
        if let Some(dir) = var("WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }

        config.storage.endpoint = var("S3_ENDPOINT");
        if let Some(region) = var("S3_REGION") {
            config.storage.region = region;
        }
        if let Some(bucket) = var("S3_BUCKET") {
            config.storage.bucket = bucket;
        }
        config.storage.access_key_id = var("S3_ACCESS_KEY_ID");
        config.storage.secret_access_key = lookup("S3_SECRET_ACCESS_KEY");

        Ok(config)
    }

    /// Queue topology derived from the configured queue names
    pub fn topology(&self) -> Topology {
        Topology::new(self.commands_queue.clone(), self.results_queue.clone())
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if self.broker.host.is_empty() {
            anyhow::bail!("broker host cannot be empty");
        }

        if self.broker.port == 0 {
            anyhow::bail!("broker port must be greater than 0");
        }

        if self.commands_queue.is_empty() || self.results_queue.is_empty() {
            anyhow::bail!("queue names cannot be empty");
        }

        if self.commands_queue == self.results_queue {
            anyhow::bail!("commands and results queues must differ");
        }

        if self.prefetch_count == 0 {
            anyhow::bail!("prefetch_count must be greater than 0");
        }

        if self.work_dir.as_os_str().is_empty() {
            anyhow::bail!("work_dir cannot be empty");
        }

        if self.storage.bucket.is_empty() {
            anyhow::bail!("storage bucket cannot be empty");
        }

        if self.storage.access_key_id.is_some() != self.storage.secret_access_key.is_some() {
            anyhow::bail!("S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Effective configuration with secrets redacted
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "worker_id       = {}", self.worker_id)?;
        writeln!(
            f,
            "broker          = amqp://{}:***@{}:{}/{}",
            self.broker.username, self.broker.host, self.broker.port, self.broker.vhost
        )?;
        writeln!(f, "commands_queue  = {}", self.commands_queue)?;
        writeln!(f, "results_queue   = {}", self.results_queue)?;
        writeln!(f, "prefetch_count  = {}", self.prefetch_count)?;
        writeln!(f, "work_dir        = {}", self.work_dir.display())?;
        writeln!(
            f,
            "s3_endpoint     = {}",
            self.storage.endpoint.as_deref().unwrap_or("(default)")
        )?;
        writeln!(f, "s3_region       = {}", self.storage.region)?;
        writeln!(f, "s3_bucket       = {}", self.storage.bucket)?;
        write!(
            f,
            "s3_credentials  = {}",
            match &self.storage.access_key_id {
                Some(key_id) => format!("{} / ***", key_id),
                None => "(provider chain)".to_string(),
            }
        )
    }
}
