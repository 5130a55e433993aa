//! Publisher side of the photo job queue.
//!
//! Publishing is a result-returning operation: callers see delivery
//! failures instead of having them swallowed, and each publish is
//! retried with exponential backoff before the error is surfaced. The
//! producer also serves as the dead-letter sink for the consumer.

use crate::config::BrokerConfig;
use crate::job::{
    JobMessage, ERROR_REASON_HEADER, FAILED_AT_HEADER, ORIGINAL_TOPIC_HEADER, RETRY_COUNT_HEADER,
};
use backoff::ExponentialBackoffBuilder;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Errors that can occur during message production
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Failed to create producer: {0}")]
    Creation(String),

    #[error("Failed to send message to topic {topic}: {message}")]
    Send { topic: String, message: String },

    #[error("Producer flush timed out after {0:?}")]
    FlushTimeout(Duration),
}

/// Broker-confirmed position of a published message
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Publisher for thumbnail jobs and dead letters
pub struct JobProducer {
    producer: FutureProducer,
    config: Arc<BrokerConfig>,
}

impl JobProducer {
    /// Create a new producer with the given configuration
    pub fn new(config: BrokerConfig) -> Result<Self, ProducerError> {
        info!(
            brokers = %config.bootstrap_servers,
            topic = %config.job_topic,
            "Creating job producer"
        );

        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| ProducerError::Creation(e.to_string()))?;

        Ok(Self {
            producer,
            config: Arc::new(config),
        })
    }

    /// Publish a thumbnail job for a freshly stored photo.
    ///
    /// The send is retried with exponential backoff up to the configured
    /// time budget; the caller sees the final outcome either way.
    #[instrument(skip(self), fields(photo_id = %photo_id))]
    pub async fn publish(&self, photo_id: Uuid) -> Result<Delivery, ProducerError> {
        let job = JobMessage::new(photo_id);
        let key = photo_id.to_string();
        let payload = job.to_payload();

        let delivery = self
            .send_with_backoff(&self.config.job_topic, &key, &payload, &[])
            .await?;

        metrics::counter!("pipeline.jobs.published").increment(1);
        debug!(
            partition = delivery.partition,
            offset = delivery.offset,
            "Job published"
        );

        Ok(delivery)
    }

    /// Republish a delivered job payload with its redelivery counter
    /// bumped. Used by the consumer when a transient failure leaves
    /// retry budget on the table.
    #[instrument(skip(self, payload))]
    pub async fn republish(
        &self,
        payload: &[u8],
        retry_count: u32,
    ) -> Result<Delivery, ProducerError> {
        let key = String::from_utf8_lossy(payload).into_owned();
        let retry = retry_count.to_string();
        let headers = [(RETRY_COUNT_HEADER, retry.as_str())];

        let delivery = self
            .send_with_backoff(&self.config.job_topic, &key, payload, &headers)
            .await?;

        metrics::counter!("pipeline.jobs.retried").increment(1);
        Ok(delivery)
    }

    /// Route a job to the dead-letter topic.
    ///
    /// The payload is forwarded untouched; the failure context travels
    /// in headers so the original message can be replayed as-is.
    #[instrument(skip(self, payload))]
    pub async fn send_to_dlq(
        &self,
        payload: &[u8],
        retry_count: u32,
        reason: &str,
    ) -> Result<Delivery, ProducerError> {
        let key = Uuid::new_v4().to_string();
        let retry = retry_count.to_string();
        let failed_at = chrono::Utc::now().to_rfc3339();
        let headers = [
            (ORIGINAL_TOPIC_HEADER, self.config.job_topic.as_str()),
            (ERROR_REASON_HEADER, reason),
            (RETRY_COUNT_HEADER, retry.as_str()),
            (FAILED_AT_HEADER, failed_at.as_str()),
        ];

        let delivery = self
            .send_with_backoff(&self.config.dlq_topic, &key, payload, &headers)
            .await?;

        metrics::counter!("pipeline.jobs.dead_lettered").increment(1);
        warn!(
            topic = %self.config.dlq_topic,
            retry_count,
            reason,
            "Job dead-lettered"
        );

        Ok(delivery)
    }

    async fn send_with_backoff(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<Delivery, ProducerError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.publish_backoff())
            .with_max_elapsed_time(Some(self.config.publish_max_elapsed()))
            .build();

        backoff::future::retry(policy, || async {
            self.send_once(topic, key, payload, headers)
                .await
                .map_err(backoff::Error::transient)
        })
        .await
    }

    async fn send_once(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<Delivery, ProducerError> {
        let mut record = FutureRecord::to(topic).key(key).payload(payload);

        if !headers.is_empty() {
            let mut owned = OwnedHeaders::new();
            for (name, value) in headers {
                owned = owned.insert(Header {
                    key: name,
                    value: Some(*value),
                });
            }
            record = record.headers(owned);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.config.request_timeout()))
            .await
            .map_err(|(e, _)| ProducerError::Send {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        Ok(Delivery {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    /// Flush all pending messages
    pub fn flush(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|_| ProducerError::FlushTimeout(timeout))
    }
}

impl Drop for JobProducer {
    fn drop(&mut self) {
        if let Err(e) = self.flush(Duration::from_secs(5)) {
            warn!("Failed to flush producer on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_display_names_topic() {
        let err = ProducerError::Send {
            topic: "photo".to_string(),
            message: "broker down".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("photo"));
        assert!(text.contains("broker down"));
    }
}
