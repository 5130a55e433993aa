//! Broker configuration for the Shutter photo pipeline.
//!
//! The pipeline runs on a single durable queue topic ("photo") plus a
//! dead-letter topic for jobs that exhaust their redelivery budget. The
//! broker address comes from the environment and defaults to a local
//! Kafka instance.

use rdkafka::config::ClientConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading broker configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Connection and delivery settings for the job queue
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Kafka bootstrap servers
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    /// Client ID reported to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Consumer group ID
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Topic carrying thumbnail jobs
    #[serde(default = "default_job_topic")]
    pub job_topic: String,
    /// Dead-letter topic for exhausted or poison jobs
    #[serde(default = "default_dlq_topic")]
    pub dlq_topic: String,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
    /// Per-send delivery timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Redelivery budget per job before it is dead-lettered
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff between publish attempts in milliseconds
    #[serde(default = "default_publish_backoff_ms")]
    pub publish_backoff_ms: u64,
    /// Total time budget for publish retries in milliseconds
    #[serde(default = "default_publish_max_elapsed_ms")]
    pub publish_max_elapsed_ms: u64,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_client_id() -> String {
    "shutter".to_string()
}

fn default_group_id() -> String {
    "thumbnail-worker".to_string()
}

fn default_job_topic() -> String {
    "photo".to_string()
}

fn default_dlq_topic() -> String {
    "photo.dlq".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_max_retries() -> u32 {
    3
}

fn default_publish_backoff_ms() -> u64 {
    100
}

fn default_publish_max_elapsed_ms() -> u64 {
    10000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            client_id: default_client_id(),
            group_id: default_group_id(),
            job_topic: default_job_topic(),
            dlq_topic: default_dlq_topic(),
            auto_offset_reset: default_auto_offset_reset(),
            session_timeout_ms: default_session_timeout_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            publish_backoff_ms: default_publish_backoff_ms(),
            publish_max_elapsed_ms: default_publish_max_elapsed_ms(),
            ssl_enabled: false,
            ssl_ca_location: None,
            sasl_username: None,
            sasl_password: None,
        }
    }
}

impl BrokerConfig {
    /// Create a configuration for the given broker address
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables, falling back to a
    /// local broker address
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(servers) = std::env::var("KAFKA_BOOTSTRAP_SERVERS") {
            config.bootstrap_servers = servers;
        }
        if let Ok(client_id) = std::env::var("KAFKA_CLIENT_ID") {
            config.client_id = client_id;
        }
        if let Ok(group_id) = std::env::var("KAFKA_GROUP_ID") {
            config.group_id = group_id;
        }
        if let Ok(topic) = std::env::var("KAFKA_JOB_TOPIC") {
            config.job_topic = topic;
        }
        if let Ok(topic) = std::env::var("KAFKA_DLQ_TOPIC") {
            config.dlq_topic = topic;
        }
        if let Ok(retries) = std::env::var("KAFKA_MAX_RETRIES") {
            config.max_retries = retries.parse().map_err(|_| ConfigError::InvalidValue {
                key: "KAFKA_MAX_RETRIES".to_string(),
                message: format!("not a number: {retries}"),
            })?;
        }
        if let Ok(username) = std::env::var("KAFKA_SASL_USERNAME") {
            config.sasl_username = Some(username);
        }
        if let Ok(password) = std::env::var("KAFKA_SASL_PASSWORD") {
            config.sasl_password = Some(password);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "bootstrap_servers".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.job_topic.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "job_topic".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.job_topic == self.dlq_topic {
            return Err(ConfigError::InvalidValue {
                key: "dlq_topic".to_string(),
                message: "must differ from the job topic".to_string(),
            });
        }
        Ok(())
    }

    /// Build an rdkafka producer configuration
    pub fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", self.request_timeout_ms.to_string());

        self.apply_security(&mut config);
        config
    }

    /// Build an rdkafka consumer configuration.
    ///
    /// Auto-commit is always disabled: offsets are committed explicitly,
    /// and only after a job has fully resolved.
    pub fn build_consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id)
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                self.max_poll_interval_ms.to_string(),
            );

        self.apply_security(&mut config);
        config
    }

    fn apply_security(&self, config: &mut ClientConfig) {
        if self.ssl_enabled {
            config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = self.ssl_ca_location {
                config.set("ssl.ca.location", ca_location);
            }
        }

        if let (Some(ref username), Some(ref password)) =
            (&self.sasl_username, &self.sasl_password)
        {
            config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }
    }

    /// Per-send delivery timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Initial publish backoff as a Duration
    pub fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms)
    }

    /// Total publish retry budget as a Duration
    pub fn publish_max_elapsed(&self) -> Duration {
        Duration::from_millis(self.publish_max_elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.bootstrap_servers, "localhost:9092");
        assert_eq!(config.job_topic, "photo");
        assert_eq!(config.dlq_topic, "photo.dlq");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_validate_rejects_matching_topics() {
        let mut config = BrokerConfig::default();
        config.dlq_topic = config.job_topic.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_servers() {
        let config = BrokerConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_consumer_config_disables_auto_commit() {
        let config = BrokerConfig::default().build_consumer_config();
        assert_eq!(
            config.get("enable.auto.commit").map(String::from),
            Some("false".to_string())
        );
    }
}
