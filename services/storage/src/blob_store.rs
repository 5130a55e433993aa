//! S3-backed blob store for photo and thumbnail bytes.
//!
//! Objects are organized into two namespaces rendered as key prefixes,
//! `photos/` and `thumbs/`. Every write attaches the record's metadata
//! to the object so the blob remains self-describing even without the
//! metadata store.

use crate::config::BlobConfig;
use crate::error::StorageError;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};

/// Namespace bucket a blob lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Original uploaded photos
    Photos,
    /// Worker-derived thumbnails
    Thumbs,
}

impl Namespace {
    /// Key prefix for the namespace
    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::Photos => "photos",
            Namespace::Thumbs => "thumbs",
        }
    }
}

/// An open download of a stored blob
pub struct BlobDownload {
    /// Streaming body of the object
    pub body: ByteStream,
    /// Content type recorded at write time
    pub content_type: Option<String>,
    /// Object size in bytes, when the store reports it
    pub content_length: Option<i64>,
}

/// Client wrapper over the S3 bucket holding all media blobs
pub struct BlobStore {
    client: S3Client,
    bucket: String,
}

impl BlobStore {
    /// Create a new blob store client
    pub async fn new(config: &BlobConfig) -> Result<Self, StorageError> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Blob store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    /// Build the object key for a filename within a namespace
    pub fn object_key(namespace: Namespace, filename: &str) -> String {
        format!("{}/{}", namespace.prefix(), sanitize_filename(filename))
    }

    /// Write a blob with attached metadata. The write is durably
    /// acknowledged by the store before this returns.
    #[instrument(skip(self, bytes, metadata), fields(namespace = namespace.prefix(), filename = %filename, size_bytes = bytes.len()))]
    pub async fn put(
        &self,
        namespace: Namespace,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &[(&str, &str)],
    ) -> Result<String, StorageError> {
        let key = Self::object_key(namespace, filename);
        let size = bytes.len();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type);

        for (name, value) in metadata {
            request = request.metadata(*name, *value);
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::Blob(e.to_string()))?;

        metrics::counter!("storage.blobs.written").increment(1);
        metrics::counter!("storage.bytes.written").increment(size as u64);
        debug!(key = %key, "Blob written");

        Ok(key)
    }

    /// Open a streaming download of a blob. A missing object maps to
    /// `StorageError::NotFound`; any other store failure is `Blob`.
    #[instrument(skip(self), fields(namespace = namespace.prefix(), filename = %filename))]
    pub async fn get(
        &self,
        namespace: Namespace,
        filename: &str,
    ) -> Result<BlobDownload, StorageError> {
        let key = Self::object_key(namespace, filename);

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false)
                {
                    StorageError::NotFound(key.clone())
                } else {
                    StorageError::Blob(e.to_string())
                }
            })?;

        Ok(BlobDownload {
            content_type: output.content_type().map(str::to_string),
            content_length: output.content_length(),
            body: output.body,
        })
    }

    /// Fetch a blob fully into memory. Used by the worker, which needs
    /// the whole image to decode it anyway.
    pub async fn get_bytes(
        &self,
        namespace: Namespace,
        filename: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let download = self.get(namespace, filename).await?;
        let data = download
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Blob(e.to_string()))?;
        Ok(data.into_bytes().to_vec())
    }

    /// Delete a blob. Deleting a missing object is not an error.
    #[instrument(skip(self), fields(namespace = namespace.prefix(), filename = %filename))]
    pub async fn delete(&self, namespace: Namespace, filename: &str) -> Result<(), StorageError> {
        let key = Self::object_key(namespace, filename);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::Blob(e.to_string()))?;

        debug!(key = %key, "Blob deleted");
        Ok(())
    }

    /// Check whether a blob exists
    pub async fn exists(&self, namespace: Namespace, filename: &str) -> Result<bool, StorageError> {
        let key = Self::object_key(namespace, filename);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StorageError::Blob(e.to_string()))
                }
            }
        }
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Sanitize a filename so it cannot escape its namespace prefix
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    cleaned.replace("..", "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        assert_eq!(
            BlobStore::object_key(Namespace::Photos, "abc123.jpg"),
            "photos/abc123.jpg"
        );
        assert_eq!(
            BlobStore::object_key(Namespace::Thumbs, "abc123.png"),
            "thumbs/abc123.png"
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("abc-123_x.jpg"), "abc-123_x.jpg");
        assert_eq!(sanitize_filename("a/b.jpg"), "a_b.jpg");
        assert_eq!(sanitize_filename("../etc/passwd"), "__etc_passwd");
        assert_eq!(sanitize_filename("a b.png"), "a_b.png");
    }

    #[test]
    fn test_namespace_prefixes() {
        assert_eq!(Namespace::Photos.prefix(), "photos");
        assert_eq!(Namespace::Thumbs.prefix(), "thumbs");
    }
}
