//! The thumbnail job handler.
//!
//! One job in, one thumbnail out. The handler is registered with the
//! job consumer, which acknowledges the message only after `handle`
//! returns, so every step here runs inside the at-least-once window and
//! must tolerate being run twice for the same photo. The guard against
//! duplicates is the metadata store: the thumbnail insert is idempotent
//! on photo id, and a redelivered job converges on the same record.

use crate::config::ThumbnailConfig;
use crate::resize::{render_thumbnail, ThumbnailError};
use shutter_pipeline::{async_trait, JobError, JobHandler, JobMessage};
use shutter_storage::{
    BlobStore, MetadataStore, Namespace, NewThumbnail, PhotoRecord, StorageError, ThumbnailRecord,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Blob operations the processor needs
#[async_trait]
pub trait MediaBlobs: Send + Sync {
    async fn fetch_photo(&self, filename: &str) -> Result<Vec<u8>, StorageError>;

    async fn store_thumbnail(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
        photo_id: &str,
        source_filename: &str,
    ) -> Result<(), StorageError>;

    async fn delete_thumbnail(&self, filename: &str) -> Result<(), StorageError>;
}

/// Record operations the processor needs
#[async_trait]
pub trait MediaIndex: Send + Sync {
    async fn photo(&self, id: Uuid) -> Result<Option<PhotoRecord>, StorageError>;

    async fn thumbnail_for_photo(
        &self,
        photo_id: Uuid,
    ) -> Result<Option<ThumbnailRecord>, StorageError>;

    async fn index_thumbnail(&self, thumbnail: &NewThumbnail) -> Result<Uuid, StorageError>;

    async fn link_thumbnail(
        &self,
        photo_id: Uuid,
        thumbnail_id: Uuid,
    ) -> Result<bool, StorageError>;
}

#[async_trait]
impl MediaBlobs for BlobStore {
    async fn fetch_photo(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        self.get_bytes(Namespace::Photos, filename).await
    }

    async fn store_thumbnail(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
        photo_id: &str,
        source_filename: &str,
    ) -> Result<(), StorageError> {
        self.put(
            Namespace::Thumbs,
            filename,
            bytes,
            content_type,
            &[("photo-id", photo_id), ("source-filename", source_filename)],
        )
        .await?;
        Ok(())
    }

    async fn delete_thumbnail(&self, filename: &str) -> Result<(), StorageError> {
        self.delete(Namespace::Thumbs, filename).await
    }
}

#[async_trait]
impl MediaIndex for MetadataStore {
    async fn photo(&self, id: Uuid) -> Result<Option<PhotoRecord>, StorageError> {
        self.get_photo(id).await
    }

    async fn thumbnail_for_photo(
        &self,
        photo_id: Uuid,
    ) -> Result<Option<ThumbnailRecord>, StorageError> {
        self.get_thumbnail_for_photo(photo_id).await
    }

    async fn index_thumbnail(&self, thumbnail: &NewThumbnail) -> Result<Uuid, StorageError> {
        self.insert_thumbnail(thumbnail).await
    }

    async fn link_thumbnail(
        &self,
        photo_id: Uuid,
        thumbnail_id: Uuid,
    ) -> Result<bool, StorageError> {
        MetadataStore::link_thumbnail(self, photo_id, thumbnail_id).await
    }
}

/// Handler that turns photo jobs into stored, linked thumbnails
pub struct ThumbnailProcessor<B: MediaBlobs, M: MediaIndex> {
    blob_store: Arc<B>,
    metadata_store: Arc<M>,
    config: ThumbnailConfig,
}

impl<B: MediaBlobs, M: MediaIndex> ThumbnailProcessor<B, M> {
    pub fn new(blob_store: Arc<B>, metadata_store: Arc<M>, config: ThumbnailConfig) -> Self {
        Self {
            blob_store,
            metadata_store,
            config,
        }
    }

    /// Run one job to completion: fetch the original, render the
    /// thumbnail, store its blob, record it, and link it on the photo.
    #[instrument(skip(self), fields(photo_id = %job.photo_id, retry_count = job.retry_count))]
    async fn process(&self, job: &JobMessage) -> Result<(), JobError> {
        let started = Instant::now();

        let photo = self
            .metadata_store
            .photo(job.photo_id)
            .await
            .map_err(|e| JobError::transient(format!("photo lookup failed: {e}")))?
            .ok_or_else(|| {
                // Deleted after upload, or the job references a photo
                // that never existed. Retrying cannot fix either.
                JobError::fatal(format!("photo {} has no record", job.photo_id))
            })?;

        // Redelivery check: if a thumbnail already exists, the previous
        // delivery got far enough. Re-link and finish.
        if let Some(existing) = self
            .metadata_store
            .thumbnail_for_photo(job.photo_id)
            .await
            .map_err(|e| JobError::transient(format!("thumbnail lookup failed: {e}")))?
        {
            debug!(thumbnail_id = %existing.id, "Thumbnail already derived, re-linking");
            self.link(job.photo_id, existing.id).await?;
            metrics::counter!("worker.jobs.duplicate").increment(1);
            return Ok(());
        }

        let original = self
            .blob_store
            .fetch_photo(&photo.filename)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    JobError::fatal(format!("photo blob missing: {e}"))
                } else {
                    JobError::transient(format!("photo blob read failed: {e}"))
                }
            })?;

        let rendered = render_thumbnail(&original, &photo.content_type, &self.config)
            .map_err(fatal_render_error)?;

        let thumbnail_id = Uuid::new_v4();
        let filename = thumbnail_filename(thumbnail_id, &photo);
        let photo_id = photo.id.to_string();

        self.blob_store
            .store_thumbnail(
                &filename,
                rendered.clone(),
                &photo.content_type,
                &photo_id,
                &photo.filename,
            )
            .await
            .map_err(|e| JobError::transient(format!("thumbnail blob write failed: {e}")))?;

        // Idempotent on photo id: if another delivery won the race, the
        // surviving record's id comes back and our blob is orphaned
        // garbage, never referenced by any record.
        let recorded_id = self
            .metadata_store
            .index_thumbnail(&NewThumbnail {
                id: thumbnail_id,
                photo_id: photo.id,
                filename: filename.clone(),
                content_type: photo.content_type.clone(),
                source_filename: photo.filename.clone(),
                size_bytes: rendered.len() as i64,
            })
            .await
            .map_err(|e| JobError::transient(format!("thumbnail record insert failed: {e}")))?;

        if recorded_id != thumbnail_id {
            warn!(
                thumbnail_id = %recorded_id,
                discarded = %thumbnail_id,
                "Concurrent delivery already recorded a thumbnail"
            );
            if let Err(e) = self.blob_store.delete_thumbnail(&filename).await {
                warn!(filename = %filename, error = %e, "Failed to clean up losing thumbnail blob");
            }
        }

        self.link(photo.id, recorded_id).await?;

        metrics::counter!("worker.thumbnails.created").increment(1);
        info!(
            thumbnail_id = %recorded_id,
            filename = %filename,
            size_bytes = rendered.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Thumbnail stored"
        );

        Ok(())
    }

    async fn link(&self, photo_id: Uuid, thumbnail_id: Uuid) -> Result<(), JobError> {
        let linked = self
            .metadata_store
            .link_thumbnail(photo_id, thumbnail_id)
            .await
            .map_err(|e| JobError::transient(format!("thumbnail link failed: {e}")))?;

        if !linked {
            // The photo row vanished between lookup and link; the
            // cascade already removed the thumbnail record with it.
            return Err(JobError::fatal(format!(
                "photo {photo_id} deleted during processing"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl<B: MediaBlobs, M: MediaIndex> JobHandler for ThumbnailProcessor<B, M> {
    async fn handle(&self, job: JobMessage) -> Result<(), JobError> {
        match tokio::time::timeout(self.config.processing_timeout(), self.process(&job)).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("worker.jobs.timed_out").increment(1);
                Err(JobError::transient(format!(
                    "processing exceeded {}s deadline",
                    self.config.processing_timeout_secs
                )))
            }
        }
    }
}

/// Decode and encode failures are properties of the stored bytes;
/// redelivery would replay the exact same failure.
fn fatal_render_error(e: ThumbnailError) -> JobError {
    metrics::counter!("worker.thumbnails.render_failed").increment(1);
    JobError::fatal(e.to_string())
}

/// Thumbnail blobs get their own id but keep the source's extension.
fn thumbnail_filename(id: Uuid, photo: &PhotoRecord) -> String {
    match photo.filename.rsplit_once('.') {
        Some((_, ext)) => format!("{}.{}", id.simple(), ext),
        None => id.simple().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    struct MemoryBlobs {
        photos: HashMap<String, Vec<u8>>,
        thumbnail_writes: Mutex<Vec<String>>,
    }

    impl MemoryBlobs {
        fn with_photo(filename: &str, bytes: Vec<u8>) -> Self {
            Self {
                photos: HashMap::from([(filename.to_string(), bytes)]),
                thumbnail_writes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaBlobs for MemoryBlobs {
        async fn fetch_photo(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
            self.photos
                .get(filename)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(filename.to_string()))
        }

        async fn store_thumbnail(
            &self,
            filename: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
            _photo_id: &str,
            _source_filename: &str,
        ) -> Result<(), StorageError> {
            self.thumbnail_writes
                .lock()
                .unwrap()
                .push(filename.to_string());
            Ok(())
        }

        async fn delete_thumbnail(&self, filename: &str) -> Result<(), StorageError> {
            self.thumbnail_writes
                .lock()
                .unwrap()
                .retain(|f| f != filename);
            Ok(())
        }
    }

    struct MemoryIndex {
        photo: PhotoRecord,
        thumbnails: Mutex<HashMap<Uuid, ThumbnailRecord>>,
    }

    impl MemoryIndex {
        fn with_photo(photo: PhotoRecord) -> Self {
            Self {
                photo,
                thumbnails: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl MediaIndex for MemoryIndex {
        async fn photo(&self, id: Uuid) -> Result<Option<PhotoRecord>, StorageError> {
            if id == self.photo.id {
                Ok(Some(self.photo.clone()))
            } else {
                Ok(None)
            }
        }

        async fn thumbnail_for_photo(
            &self,
            photo_id: Uuid,
        ) -> Result<Option<ThumbnailRecord>, StorageError> {
            Ok(self.thumbnails.lock().unwrap().get(&photo_id).cloned())
        }

        async fn index_thumbnail(&self, thumbnail: &NewThumbnail) -> Result<Uuid, StorageError> {
            let mut map = self.thumbnails.lock().unwrap();
            if let Some(existing) = map.get(&thumbnail.photo_id) {
                return Ok(existing.id);
            }
            map.insert(
                thumbnail.photo_id,
                ThumbnailRecord {
                    id: thumbnail.id,
                    photo_id: thumbnail.photo_id,
                    filename: thumbnail.filename.clone(),
                    content_type: thumbnail.content_type.clone(),
                    source_filename: thumbnail.source_filename.clone(),
                    size_bytes: thumbnail.size_bytes,
                    created_at: Utc::now(),
                },
            );
            Ok(thumbnail.id)
        }

        async fn link_thumbnail(
            &self,
            photo_id: Uuid,
            _thumbnail_id: Uuid,
        ) -> Result<bool, StorageError> {
            Ok(photo_id == self.photo.id)
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([30, 60, 90])));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn photo(filename: &str) -> PhotoRecord {
        PhotoRecord {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            content_type: "image/png".to_string(),
            caption: None,
            user_id: "u1".to_string(),
            business_id: "b1".to_string(),
            size_bytes: 100,
            thumbnail_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_redelivered_job_creates_no_second_thumbnail() {
        let record = photo("source.png");
        let photo_id = record.id;
        let blobs = Arc::new(MemoryBlobs::with_photo("source.png", png_bytes()));
        let index = Arc::new(MemoryIndex::with_photo(record));
        let processor =
            ThumbnailProcessor::new(blobs.clone(), index.clone(), ThumbnailConfig::default());

        processor.handle(JobMessage::new(photo_id)).await.unwrap();
        let first = index
            .thumbnail_for_photo(photo_id)
            .await
            .unwrap()
            .unwrap();

        // Same job again, as the broker redelivers after a missed ack.
        processor
            .handle(JobMessage {
                photo_id,
                retry_count: 1,
            })
            .await
            .unwrap();

        let second = index
            .thumbnail_for_photo(photo_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(index.thumbnails.lock().unwrap().len(), 1);
        assert_eq!(blobs.thumbnail_writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_photo_is_fatal() {
        let blobs = Arc::new(MemoryBlobs::with_photo("source.png", png_bytes()));
        let index = Arc::new(MemoryIndex::with_photo(photo("source.png")));
        let processor = ThumbnailProcessor::new(blobs, index, ThumbnailConfig::default());

        let err = processor
            .handle(JobMessage::new(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_undecodable_photo_is_fatal() {
        let record = photo("source.png");
        let photo_id = record.id;
        let blobs = Arc::new(MemoryBlobs::with_photo(
            "source.png",
            b"not an image".to_vec(),
        ));
        let index = Arc::new(MemoryIndex::with_photo(record));
        let processor = ThumbnailProcessor::new(blobs, index.clone(), ThumbnailConfig::default());

        let err = processor.handle(JobMessage::new(photo_id)).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(index.thumbnails.lock().unwrap().is_empty());
    }

    #[test]
    fn test_thumbnail_filename_keeps_extension() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let name = thumbnail_filename(id, &photo("source.jpg"));
        assert_eq!(name, "550e8400e29b41d4a716446655440000.jpg");
    }

    #[test]
    fn test_thumbnail_filename_without_extension() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let name = thumbnail_filename(id, &photo("source"));
        assert_eq!(name, "550e8400e29b41d4a716446655440000");
    }

    #[test]
    fn test_render_failures_are_fatal() {
        let err = fatal_render_error(ThumbnailError::Decode("truncated".to_string()));
        assert!(!err.is_transient());
    }
}
