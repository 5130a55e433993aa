//! Photo ingest: multipart upload, blob write, job publish.
//!
//! Ordering is the contract here: the blob and its record are durably
//! committed before the job message is published, so the queue can
//! never reference a photo that does not exist. A publish failure is
//! logged and counted but does not fail the upload — the photo is
//! stored either way, it just never gets a thumbnail.

use crate::error::ApiError;
use crate::routes::AppState;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use shutter_pipeline::{async_trait, Delivery, JobProducer, ProducerError};
use shutter_storage::{BlobStore, MetadataStore, Namespace, NewPhoto, StorageError};
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Map an allowed MIME type to its file extension. Anything outside
/// the allow-list is rejected before any object is created.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

/// Blob write seam for the upload flow
#[async_trait]
pub trait PhotoWriter: Send + Sync {
    async fn write_photo(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &[(&str, &str)],
    ) -> Result<(), StorageError>;
}

/// Record insert seam for the upload flow
#[async_trait]
pub trait PhotoIndex: Send + Sync {
    async fn index_photo(&self, photo: &NewPhoto) -> Result<(), StorageError>;
}

/// Job publish seam for the upload flow
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, photo_id: Uuid) -> Result<Delivery, ProducerError>;
}

#[async_trait]
impl PhotoWriter for BlobStore {
    async fn write_photo(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &[(&str, &str)],
    ) -> Result<(), StorageError> {
        self.put(Namespace::Photos, filename, bytes, content_type, metadata)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PhotoIndex for MetadataStore {
    async fn index_photo(&self, photo: &NewPhoto) -> Result<(), StorageError> {
        self.insert_photo(photo).await
    }
}

#[async_trait]
impl JobQueue for JobProducer {
    async fn publish(&self, photo_id: Uuid) -> Result<Delivery, ProducerError> {
        JobProducer::publish(self, photo_id).await
    }
}

/// Successful upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub links: UploadLinks,
}

/// HATEOAS links for a stored photo
#[derive(Debug, Serialize)]
pub struct UploadLinks {
    pub photo: String,
    pub business: String,
}

impl UploadResponse {
    pub fn new(id: Uuid, business_id: &str) -> Self {
        Self {
            id,
            links: UploadLinks {
                photo: format!("/photos/{id}"),
                business: format!("/businesses/{business_id}"),
            },
        }
    }
}

/// Parsed and validated upload form
struct UploadForm {
    bytes: Vec<u8>,
    content_type: String,
    extension: &'static str,
    user_id: String,
    business_id: String,
    caption: Option<String>,
}

async fn parse_upload(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut content_type: Option<String> = None;
    let mut extension: Option<&'static str> = None;
    let mut user_id: Option<String> = None;
    let mut business_id: Option<String> = None;
    let mut caption: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("photo") => {
                let mime = field
                    .content_type()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::Validation("photo field has no content type".into()))?;
                // Reject unsupported types before buffering the body.
                let ext = extension_for_mime(&mime).ok_or_else(|| {
                    ApiError::Validation(format!("unsupported content type: {mime}"))
                })?;
                extension = Some(ext);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read photo field: {e}")))?;
                content_type = Some(mime);
                bytes = Some(data.to_vec());
            }
            Some("userid") => {
                user_id = Some(read_text_field(field).await?);
            }
            Some("businessid") => {
                business_id = Some(read_text_field(field).await?);
            }
            Some("caption") => {
                caption = Some(read_text_field(field).await?);
            }
            _ => {}
        }
    }

    let bytes = bytes
        .ok_or_else(|| ApiError::Validation("request is missing the photo field".into()))?;
    let content_type = content_type
        .ok_or_else(|| ApiError::Validation("request is missing the photo field".into()))?;
    let extension = extension
        .ok_or_else(|| ApiError::Validation("request is missing the photo field".into()))?;
    let user_id = require_field(user_id, "userid")?;
    let business_id = require_field(business_id, "businessid")?;

    if bytes.is_empty() {
        return Err(ApiError::Validation("photo field is empty".into()));
    }

    Ok(UploadForm {
        bytes,
        content_type,
        extension,
        user_id,
        business_id,
        caption,
    })
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("failed to read form field: {e}")))
}

fn require_field(value: Option<String>, name: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::Validation(format!(
            "request body does not contain required field {name}"
        ))),
    }
}

/// Store a validated upload and queue its thumbnail job.
///
/// Blob first, record second; the job is published only after both
/// writes have succeeded. The upload already succeeded by the time the
/// job is published, so a failed publish means the photo will never get
/// a thumbnail, which must be visible in logs and metrics rather than
/// failing the request.
async fn store_and_publish(
    blob_store: &impl PhotoWriter,
    metadata_store: &impl PhotoIndex,
    producer: &impl JobQueue,
    form: UploadForm,
) -> Result<UploadResponse, ApiError> {
    let id = Uuid::new_v4();
    let filename = format!("{}.{}", id.simple(), form.extension);

    let mut metadata: Vec<(&str, &str)> = vec![
        ("user-id", form.user_id.as_str()),
        ("business-id", form.business_id.as_str()),
    ];
    if let Some(ref caption) = form.caption {
        metadata.push(("caption", caption.as_str()));
    }

    let size_bytes = form.bytes.len() as i64;

    blob_store
        .write_photo(&filename, form.bytes, &form.content_type, &metadata)
        .await?;

    metadata_store
        .index_photo(&NewPhoto {
            id,
            filename: filename.clone(),
            content_type: form.content_type.clone(),
            caption: form.caption.clone(),
            user_id: form.user_id.clone(),
            business_id: form.business_id.clone(),
            size_bytes,
        })
        .await?;

    metrics::counter!("api.photos.uploaded").increment(1);
    info!(photo_id = %id, filename = %filename, size_bytes, "Photo stored");

    match producer.publish(id).await {
        Ok(delivery) => {
            info!(
                photo_id = %id,
                partition = delivery.partition,
                offset = delivery.offset,
                "Thumbnail job published"
            );
        }
        Err(e) => {
            error!(photo_id = %id, error = %e, "Failed to publish thumbnail job");
            metrics::counter!("api.jobs.publish_failed").increment(1);
        }
    }

    Ok(UploadResponse::new(id, &form.business_id))
}

/// POST /photos — store an uploaded photo and queue its thumbnail job
#[instrument(skip(state, multipart))]
pub async fn upload_photo(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let form = parse_upload(multipart).await?;

    let response = store_and_publish(
        state.blob_store.as_ref(),
        state.metadata_store.as_ref(),
        state.producer.as_ref(),
        form,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBlobStore {
        written: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PhotoWriter for RecordingBlobStore {
        async fn write_photo(
            &self,
            filename: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
            _metadata: &[(&str, &str)],
        ) -> Result<(), StorageError> {
            self.written.lock().unwrap().push(filename.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingIndex {
        photos: Mutex<Vec<NewPhoto>>,
    }

    #[async_trait]
    impl PhotoIndex for RecordingIndex {
        async fn index_photo(&self, photo: &NewPhoto) -> Result<(), StorageError> {
            self.photos.lock().unwrap().push(photo.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        published: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl JobQueue for RecordingQueue {
        async fn publish(&self, photo_id: Uuid) -> Result<Delivery, ProducerError> {
            self.published.lock().unwrap().push(photo_id);
            Ok(Delivery {
                topic: "photo".to_string(),
                partition: 0,
                offset: 1,
            })
        }
    }

    struct UnreachableBroker;

    #[async_trait]
    impl JobQueue for UnreachableBroker {
        async fn publish(&self, _photo_id: Uuid) -> Result<Delivery, ProducerError> {
            Err(ProducerError::Send {
                topic: "photo".to_string(),
                message: "all brokers are down".to_string(),
            })
        }
    }

    fn jpeg_form() -> UploadForm {
        UploadForm {
            bytes: vec![0xff, 0xd8, 0xff, 0xe0],
            content_type: "image/jpeg".to_string(),
            extension: "jpg",
            user_id: "u1".to_string(),
            business_id: "b1".to_string(),
            caption: None,
        }
    }

    #[test]
    fn test_mime_allow_list() {
        assert_eq!(extension_for_mime("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for_mime("image/png"), Some("png"));
        assert_eq!(extension_for_mime("text/plain"), None);
        assert_eq!(extension_for_mime("image/gif"), None);
        assert_eq!(extension_for_mime("application/octet-stream"), None);
    }

    #[test]
    fn test_require_field() {
        assert!(require_field(Some("u1".to_string()), "userid").is_ok());
        assert!(require_field(Some("   ".to_string()), "userid").is_err());
        assert!(require_field(None, "businessid").is_err());
    }

    #[test]
    fn test_upload_response_links() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let response = UploadResponse::new(id, "b42");
        assert_eq!(
            response.links.photo,
            "/photos/550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(response.links.business, "/businesses/b42");

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("id").is_some());
        assert!(json.pointer("/links/photo").is_some());
        assert!(json.pointer("/links/business").is_some());
    }

    #[tokio::test]
    async fn test_upload_publishes_job_for_stored_photo() {
        let blob_store = RecordingBlobStore::default();
        let index = RecordingIndex::default();
        let queue = RecordingQueue::default();

        let response = store_and_publish(&blob_store, &index, &queue, jpeg_form())
            .await
            .unwrap();

        let photos = index.photos.lock().unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].id, response.id);
        assert_eq!(*queue.published.lock().unwrap(), vec![response.id]);
    }

    #[tokio::test]
    async fn test_upload_succeeds_when_broker_is_unreachable() {
        let blob_store = RecordingBlobStore::default();
        let index = RecordingIndex::default();

        // The photo is durable before the publish is attempted; a dead
        // broker costs the thumbnail, not the upload.
        let response = store_and_publish(&blob_store, &index, &UnreachableBroker, jpeg_form())
            .await
            .unwrap();

        let written = blob_store.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0], format!("{}.jpg", response.id.simple()));

        let photos = index.photos.lock().unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].id, response.id);
    }
}
