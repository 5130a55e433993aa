//! Shutter Pipeline - durable job queue for photo thumbnailing
//!
//! This library is the broker layer between the upload API and the
//! thumbnail worker. It provides:
//!
//! - A result-returning [`JobProducer`] that publishes one job per
//!   stored photo, retried with backoff instead of fire-and-forget
//! - A [`JobConsumer`] with a single acknowledgment discipline: offsets
//!   are committed only after the handler fully resolves
//! - Bounded redelivery via a retry-count header, with a dead-letter
//!   topic once the budget is exhausted
//!
//! The wire format is deliberately plain: the job payload is the raw
//! text of the photo blob id on the `photo` topic.

pub mod config;
pub mod consumer;
pub mod job;
pub mod producer;

pub use config::{BrokerConfig, ConfigError};
pub use consumer::{ConsumerError, JobConsumer, JobHandler};
pub use job::{JobError, JobMessage, RETRY_COUNT_HEADER};
pub use producer::{Delivery, JobProducer, ProducerError};

// Re-export for handler implementations
pub use async_trait::async_trait;
