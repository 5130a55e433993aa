//! Consumer side of the photo job queue.
//!
//! Delivery is at-least-once with one acknowledgment discipline applied
//! uniformly: the offset for a message is committed only after the
//! handler has fully resolved. A crash mid-job leaves the offset
//! uncommitted and the job eligible for redelivery. Transient failures
//! are requeued with a bumped retry counter until the budget runs out,
//! then dead-lettered; fatal failures are dead-lettered immediately.

use crate::config::BrokerConfig;
use crate::job::{retry_count_from_headers, JobError, JobMessage};
use crate::producer::JobProducer;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur during message consumption
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Failed to create consumer: {0}")]
    Creation(String),

    #[error("Failed to subscribe to topic: {0}")]
    Subscription(String),
}

/// Handler invoked once per delivered job.
///
/// The consume loop does not commit the message until `handle` returns,
/// so implementations must not spawn the real work and return early —
/// that would reintroduce ack-on-receipt and silently drop failed jobs.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: JobMessage) -> Result<(), JobError>;
}

/// Consumer for thumbnail jobs with retry and dead-letter routing
pub struct JobConsumer {
    consumer: StreamConsumer,
    producer: Arc<JobProducer>,
    config: Arc<BrokerConfig>,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobConsumer {
    /// Create a consumer subscribed to the job topic.
    ///
    /// The producer is used for requeueing transient failures and for
    /// the dead-letter topic.
    pub fn new(config: BrokerConfig, producer: Arc<JobProducer>) -> Result<Self, ConsumerError> {
        info!(
            brokers = %config.bootstrap_servers,
            group = %config.group_id,
            topic = %config.job_topic,
            "Creating job consumer"
        );

        let consumer: StreamConsumer = config
            .build_consumer_config()
            .create()
            .map_err(|e| ConsumerError::Creation(e.to_string()))?;

        consumer
            .subscribe(&[config.job_topic.as_str()])
            .map_err(|e| ConsumerError::Subscription(e.to_string()))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            consumer,
            producer,
            config: Arc::new(config),
            shutdown_tx,
        })
    }

    /// Signal the consume loop to stop after the in-flight message
    pub fn shutdown(&self) {
        info!("Signaling consumer shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Consume jobs until shutdown, one message at a time.
    ///
    /// Each message is fully resolved — processed, requeued, or
    /// dead-lettered — before its offset is committed and the next one
    /// is taken.
    #[instrument(skip(self, handler))]
    pub async fn run<H: JobHandler>(&self, handler: Arc<H>) -> Result<(), ConsumerError> {
        use tokio_stream::StreamExt;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let stream = self.consumer.stream();
        tokio::pin!(stream);

        info!("Starting job consumption loop");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
                message_result = stream.next() => {
                    match message_result {
                        Some(Ok(message)) => {
                            let resolved = self.resolve_message(&message, handler.as_ref()).await;
                            if resolved {
                                if let Err(e) =
                                    self.consumer.commit_message(&message, CommitMode::Async)
                                {
                                    warn!(error = %e, "Failed to commit offset");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Broker error");
                            metrics::counter!("pipeline.consumer.errors").increment(1);
                        }
                        None => {
                            debug!("Message stream ended");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Process one delivered message to a terminal state.
    ///
    /// Returns true when the offset may be committed. False means the
    /// message could not be parked anywhere (e.g. the requeue publish
    /// itself failed) and must stay unacknowledged for redelivery.
    async fn resolve_message<H: JobHandler>(
        &self,
        message: &BorrowedMessage<'_>,
        handler: &H,
    ) -> bool {
        let payload = message.payload().unwrap_or(&[]).to_vec();
        let headers = extract_headers(message);
        let retry_count = retry_count_from_headers(&headers);

        metrics::counter!("pipeline.jobs.consumed").increment(1);
        debug!(
            partition = message.partition(),
            offset = message.offset(),
            retry_count,
            "Received job"
        );

        let job = match JobMessage::parse(&payload, retry_count) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Malformed job payload");
                metrics::counter!("pipeline.jobs.malformed").increment(1);
                return self.dead_letter(&payload, retry_count, &e.to_string()).await;
            }
        };

        match handler.handle(job.clone()).await {
            Ok(()) => {
                metrics::counter!("pipeline.jobs.completed").increment(1);
                debug!(photo_id = %job.photo_id, "Job completed");
                true
            }
            Err(e) if should_requeue(&e, retry_count, self.config.max_retries) => {
                warn!(
                    photo_id = %job.photo_id,
                    retry_count,
                    max_retries = self.config.max_retries,
                    reason = %e,
                    "Transient failure, requeueing job"
                );
                match self.producer.republish(&payload, retry_count + 1).await {
                    Ok(_) => true,
                    Err(e) => {
                        error!(error = %e, "Failed to requeue job, withholding ack");
                        false
                    }
                }
            }
            Err(e) => {
                let reason = if e.is_transient() {
                    format!("retry budget exhausted: {e}")
                } else {
                    e.to_string()
                };
                error!(photo_id = %job.photo_id, retry_count, reason = %reason, "Job failed");
                self.dead_letter(&payload, retry_count, &reason).await
            }
        }
    }

    async fn dead_letter(&self, payload: &[u8], retry_count: u32, reason: &str) -> bool {
        match self.producer.send_to_dlq(payload, retry_count, reason).await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to dead-letter job, withholding ack");
                false
            }
        }
    }
}

/// Whether a failed job is worth requeueing rather than dead-lettering
fn should_requeue(error: &JobError, retry_count: u32, max_retries: u32) -> bool {
    error.is_transient() && retry_count < max_retries
}

/// Collect message headers into an owned map
fn extract_headers(message: &BorrowedMessage<'_>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            if let Some(value) = header.value {
                if let Ok(text) = std::str::from_utf8(value) {
                    map.insert(header.key.to_string(), text.to_string());
                }
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RETRY_COUNT_HEADER;

    #[test]
    fn test_transient_failures_requeue_until_budget_exhausted() {
        let err = JobError::transient("store unavailable");
        assert!(should_requeue(&err, 0, 3));
        assert!(should_requeue(&err, 2, 3));
        assert!(!should_requeue(&err, 3, 3));
    }

    #[test]
    fn test_fatal_failures_never_requeue() {
        let err = JobError::fatal("undecodable image");
        assert!(!should_requeue(&err, 0, 3));
    }

    #[test]
    fn test_retry_header_round_trip() {
        let mut headers = HashMap::new();
        headers.insert(RETRY_COUNT_HEADER.to_string(), "3".to_string());
        assert_eq!(retry_count_from_headers(&headers), 3);
    }
}
