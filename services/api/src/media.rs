//! Photo retrieval and deletion.
//!
//! Two surfaces: JSON photo detail with media links, and the media
//! endpoints that stream blob bytes straight from the store. Streaming
//! never buffers the object; the blob body is forwarded to the client
//! as it arrives.

use crate::error::ApiError;
use crate::routes::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use shutter_storage::{BlobDownload, Namespace, PhotoRecord};
use tokio_util::io::ReaderStream;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Photo detail response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResponse {
    pub id: Uuid,
    /// Media URL for the original bytes
    pub url: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub userid: String,
    pub businessid: String,
    pub size_bytes: i64,
    /// Set once the worker has derived and linked a thumbnail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl PhotoResponse {
    fn new(photo: PhotoRecord, thumbnail_filename: Option<String>) -> Self {
        Self {
            id: photo.id,
            url: format!("/media/photos/{}", photo.filename),
            content_type: photo.content_type,
            caption: photo.caption,
            userid: photo.user_id,
            businessid: photo.business_id,
            size_bytes: photo.size_bytes,
            thumb_id: photo.thumbnail_id,
            thumbnail_url: thumbnail_filename.map(|f| format!("/media/thumbs/{f}")),
        }
    }
}

/// GET /photos/:photo_id — photo record with media links
#[instrument(skip(state))]
pub async fn get_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
) -> Result<Json<PhotoResponse>, ApiError> {
    let photo = state
        .metadata_store
        .get_photo(photo_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    // The linkage on the photo row is authoritative, but the thumbnail
    // record carries the filename the media URL needs.
    let thumbnail = state
        .metadata_store
        .get_thumbnail_for_photo(photo_id)
        .await?;

    Ok(Json(PhotoResponse::new(
        photo,
        thumbnail.map(|t| t.filename),
    )))
}

/// DELETE /photos/:photo_id — remove the photo, its thumbnail, and
/// both blobs.
///
/// Record rows go first so no reader can resolve a filename to a blob
/// that has already been deleted. A blob delete failure after the rows
/// are gone leaves an orphaned object, which is logged and counted; it
/// is unreachable and harmless beyond the space it holds.
#[instrument(skip(state))]
pub async fn delete_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let photo = state
        .metadata_store
        .get_photo(photo_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let thumbnail = state
        .metadata_store
        .get_thumbnail_for_photo(photo_id)
        .await?;

    // Cascades to the thumbnail row.
    let deleted = state.metadata_store.delete_photo(photo_id).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }

    if let Some(ref thumb) = thumbnail {
        if let Err(e) = state
            .blob_store
            .delete(Namespace::Thumbs, &thumb.filename)
            .await
        {
            warn!(photo_id = %photo_id, filename = %thumb.filename, error = %e, "Orphaned thumbnail blob");
            metrics::counter!("api.blobs.orphaned").increment(1);
        }
    }

    if let Err(e) = state
        .blob_store
        .delete(Namespace::Photos, &photo.filename)
        .await
    {
        warn!(photo_id = %photo_id, filename = %photo.filename, error = %e, "Orphaned photo blob");
        metrics::counter!("api.blobs.orphaned").increment(1);
    }

    metrics::counter!("api.photos.deleted").increment(1);
    info!(photo_id = %photo_id, "Photo deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /media/photos/:filename — stream original photo bytes
#[instrument(skip(state))]
pub async fn stream_photo(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let record = state
        .metadata_store
        .get_photo_by_filename(&filename)
        .await?
        .ok_or(ApiError::NotFound)?;

    let download = state.blob_store.get(Namespace::Photos, &filename).await?;
    metrics::counter!("api.media.photos_served").increment(1);
    stream_response(download, &record.content_type)
}

/// GET /media/thumbs/:filename — stream thumbnail bytes
#[instrument(skip(state))]
pub async fn stream_thumb(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let record = state
        .metadata_store
        .get_thumbnail_by_filename(&filename)
        .await?
        .ok_or(ApiError::NotFound)?;

    let download = state.blob_store.get(Namespace::Thumbs, &filename).await?;
    metrics::counter!("api.media.thumbs_served").increment(1);
    stream_response(download, &record.content_type)
}

/// Build a streaming response over a blob download. The record's
/// content type wins over whatever the store reports.
fn stream_response(download: BlobDownload, content_type: &str) -> Result<Response, ApiError> {
    let content_length = download.content_length;
    let stream = ReaderStream::new(download.body.into_async_read());

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);

    if let Some(length) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn photo_record(thumbnail_id: Option<Uuid>) -> PhotoRecord {
        PhotoRecord {
            id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            filename: "550e8400e29b41d4a716446655440000.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            caption: Some("storefront".to_string()),
            user_id: "u1".to_string(),
            business_id: "b1".to_string(),
            size_bytes: 2048,
            thumbnail_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_photo_response_without_thumbnail() {
        let response = PhotoResponse::new(photo_record(None), None);
        assert_eq!(
            response.url,
            "/media/photos/550e8400e29b41d4a716446655440000.jpg"
        );
        assert!(response.thumb_id.is_none());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["contentType"], "image/jpeg");
        assert_eq!(json["userid"], "u1");
        assert!(json.get("thumbId").is_none());
        assert!(json.get("thumbnailUrl").is_none());
    }

    #[test]
    fn test_photo_response_with_thumbnail() {
        let thumb_id = Uuid::new_v4();
        let response = PhotoResponse::new(
            photo_record(Some(thumb_id)),
            Some("abc.jpg".to_string()),
        );
        assert_eq!(response.thumb_id, Some(thumb_id));
        assert_eq!(
            response.thumbnail_url.as_deref(),
            Some("/media/thumbs/abc.jpg")
        );

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("thumbId").is_some());
        assert_eq!(json["thumbnailUrl"], "/media/thumbs/abc.jpg");
    }
}
