use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the upload service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// HTTP API configuration
    pub http: HttpConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Idempotency reservation store configuration
    pub redis: RedisConfig,
    /// Kafka producer configuration
    pub kafka: KafkaConfig,
    /// Intake and outbox relay configuration
    pub upload: UploadConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// API listen address
    #[serde(default = "default_http_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Maximum accepted request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Idempotency reservation store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Reservation time-to-live in seconds; must outlive intake+relay latency
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,
    /// Namespace prefix for reservation keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Kafka producer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Client ID for this connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Topic the relay publishes file events to
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Intake and outbox relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Directory uploaded bytes are staged in before processing
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    /// Outbox poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub outbox_poll_interval_ms: u64,
    /// Maximum outbox rows claimed per relay cycle
    #[serde(default = "default_batch_size")]
    pub outbox_batch_size: i64,
    /// Concurrent publishes per relay cycle
    #[serde(default = "default_fan_out")]
    pub relay_fan_out: usize,
    /// Seconds before a claimed outbox row may be claimed again
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "depot-upload".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    256 * 1024 * 1024 // 256MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_idempotency_ttl_secs() -> u64 {
    300
}

fn default_key_prefix() -> String {
    "idempotency:".to_string()
}

fn default_client_id() -> String {
    "depot-upload".to_string()
}

fn default_topic() -> String {
    "depot.files.uploaded".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_staging_dir() -> String {
    "/var/lib/depot/staging".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_batch_size() -> i64 {
    100
}

fn default_fan_out() -> usize {
    10
}

fn default_claim_lease_secs() -> u64 {
    60
}

/// Reservations shorter than this cannot outlive intake+relay latency.
pub const MIN_IDEMPOTENCY_TTL_SECS: u64 = 60;

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/upload").required(false))
            .add_source(config::File::with_name("/etc/depot/upload").required(false))
            // UPLOAD__KAFKA__BOOTSTRAP_SERVERS -> kafka.bootstrap_servers
            .add_source(
                config::Environment::with_prefix("UPLOAD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field rules not expressible as serde defaults
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.redis.idempotency_ttl_secs < MIN_IDEMPOTENCY_TTL_SECS {
            anyhow::bail!(
                "redis.idempotency_ttl_secs must be at least {} (got {})",
                MIN_IDEMPOTENCY_TTL_SECS,
                self.redis.idempotency_ttl_secs
            );
        }
        if self.upload.outbox_batch_size <= 0 {
            anyhow::bail!("upload.outbox_batch_size must be positive");
        }
        if self.upload.relay_fan_out == 0 {
            anyhow::bail!("upload.relay_fan_out must be positive");
        }
        Ok(())
    }

    /// Get database connection timeout as Duration
    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn db_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.database.idle_timeout_secs)
    }

    /// Get outbox poll interval as Duration
    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.upload.outbox_poll_interval_ms)
    }

    /// Get Kafka request timeout as Duration
    pub fn kafka_request_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            service: ServiceConfig {
                name: default_service_name(),
                log_level: default_log_level(),
                metrics_port: default_metrics_port(),
            },
            http: HttpConfig {
                host: default_http_host(),
                port: default_http_port(),
                max_body_bytes: default_max_body_bytes(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/depot".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout_secs(),
                idle_timeout_secs: default_idle_timeout_secs(),
                run_migrations: true,
            },
            redis: RedisConfig {
                url: "redis://localhost".to_string(),
                idempotency_ttl_secs: default_idempotency_ttl_secs(),
                key_prefix: default_key_prefix(),
            },
            kafka: KafkaConfig {
                bootstrap_servers: "localhost:9092".to_string(),
                client_id: default_client_id(),
                topic: default_topic(),
                request_timeout_ms: default_request_timeout_ms(),
            },
            upload: UploadConfig {
                staging_dir: default_staging_dir(),
                outbox_poll_interval_ms: default_poll_interval_ms(),
                outbox_batch_size: default_batch_size(),
                relay_fan_out: default_fan_out(),
                claim_lease_secs: default_claim_lease_secs(),
            },
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_poll_interval_ms(), 5000);
        assert_eq!(default_idempotency_ttl_secs(), 300);
        assert_eq!(default_topic(), "depot.files.uploaded");
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_ttl() {
        let mut config = test_config();
        config.redis.idempotency_ttl_secs = 30;
        assert!(config.validate().is_err());
    }
}
