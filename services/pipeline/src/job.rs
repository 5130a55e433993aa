//! Job message format for the photo queue.
//!
//! The wire payload is deliberately minimal: the raw UTF-8 text of the
//! photo blob id, no envelope and no version field. The redelivery
//! counter travels out of band in a message header so the payload stays
//! byte-identical across retries.

use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Header carrying the redelivery counter
pub const RETRY_COUNT_HEADER: &str = "retry-count";

/// Header recording why a job was dead-lettered
pub const ERROR_REASON_HEADER: &str = "error-reason";

/// Header recording the topic a dead-lettered job came from
pub const ORIGINAL_TOPIC_HEADER: &str = "original-topic";

/// Header recording when a job was dead-lettered (RFC 3339)
pub const FAILED_AT_HEADER: &str = "failed-at";

/// Why a job could not be processed.
///
/// The split drives the redelivery policy: transient failures are worth
/// redelivering up to the retry budget, fatal failures go straight to
/// the dead-letter topic because replaying them can never succeed.
#[derive(Error, Debug)]
pub enum JobError {
    /// Permanent failure, e.g. an undecodable image or an unknown blob id
    #[error("fatal: {0}")]
    Fatal(String),

    /// Failure that may clear up on redelivery, e.g. a store outage
    #[error("transient: {0}")]
    Transient(String),
}

impl JobError {
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Whether redelivery could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A thumbnail job as delivered by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMessage {
    /// Blob id of the photo to thumbnail
    pub photo_id: Uuid,
    /// How many times this job has already been redelivered
    pub retry_count: u32,
}

impl JobMessage {
    /// Create a fresh job for a newly stored photo
    pub fn new(photo_id: Uuid) -> Self {
        Self {
            photo_id,
            retry_count: 0,
        }
    }

    /// Parse a job from a raw queue payload.
    ///
    /// Malformed payloads are fatal: the bytes will never parse
    /// differently on redelivery.
    pub fn parse(payload: &[u8], retry_count: u32) -> Result<Self, JobError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| JobError::fatal("job payload is not valid UTF-8"))?;

        if text.is_empty() {
            return Err(JobError::fatal("job payload is empty"));
        }

        let photo_id = Uuid::parse_str(text.trim())
            .map_err(|e| JobError::fatal(format!("job payload is not a blob id: {e}")))?;

        Ok(Self {
            photo_id,
            retry_count,
        })
    }

    /// Serialize the job to its wire payload
    pub fn to_payload(&self) -> Vec<u8> {
        self.photo_id.to_string().into_bytes()
    }
}

/// Read the redelivery counter from parsed message headers.
///
/// A missing or unparsable header counts as zero, which is what a
/// freshly published job carries.
pub fn retry_count_from_headers(headers: &HashMap<String, String>) -> u32 {
    headers
        .get(RETRY_COUNT_HEADER)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        let job = JobMessage::new(Uuid::new_v4());
        let payload = job.to_payload();
        let parsed = JobMessage::parse(&payload, 0).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_payload_is_raw_text() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let job = JobMessage::new(id);
        assert_eq!(
            job.to_payload(),
            b"550e8400-e29b-41d4-a716-446655440000".to_vec()
        );
    }

    #[test]
    fn test_parse_rejects_empty_payload() {
        let err = JobMessage::parse(b"", 0).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = JobMessage::parse(b"not-a-blob-id", 2).unwrap_err();
        assert!(matches!(err, JobError::Fatal(_)));
    }

    #[test]
    fn test_parse_carries_retry_count() {
        let id = Uuid::new_v4();
        let parsed = JobMessage::parse(id.to_string().as_bytes(), 2).unwrap();
        assert_eq!(parsed.retry_count, 2);
    }

    #[test]
    fn test_retry_count_defaults_to_zero() {
        let headers = HashMap::new();
        assert_eq!(retry_count_from_headers(&headers), 0);

        let mut headers = HashMap::new();
        headers.insert(RETRY_COUNT_HEADER.to_string(), "junk".to_string());
        assert_eq!(retry_count_from_headers(&headers), 0);
    }

    #[test]
    fn test_retry_count_parses() {
        let mut headers = HashMap::new();
        headers.insert(RETRY_COUNT_HEADER.to_string(), "2".to_string());
        assert_eq!(retry_count_from_headers(&headers), 2);
    }
}
