//! PostgreSQL-backed metadata store for photo and thumbnail records.
//!
//! The blob store holds the bytes; this store holds the records that
//! link them. Two constraints carry the pipeline's invariants: the
//! UNIQUE constraint on `thumbnails.photo_id` guarantees at most one
//! thumbnail per photo (which makes redelivered jobs idempotent), and
//! the foreign key guarantees a thumbnail never outlives its photo.

use crate::config::DatabaseConfig;
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Stored photo record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PhotoRecord {
    /// Blob id, assigned at write time
    pub id: Uuid,
    /// Filename of the blob within the photos namespace
    pub filename: String,
    /// MIME type of the stored bytes
    pub content_type: String,
    /// Optional caption supplied at upload
    pub caption: Option<String>,
    /// Uploading user
    pub user_id: String,
    /// Business the photo belongs to
    pub business_id: String,
    /// Blob size in bytes
    pub size_bytes: i64,
    /// Linked thumbnail blob id, set by the worker once derived
    pub thumbnail_id: Option<Uuid>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// Stored thumbnail record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ThumbnailRecord {
    /// Blob id of the thumbnail
    pub id: Uuid,
    /// Source photo blob id (unique: one thumbnail per photo)
    pub photo_id: Uuid,
    /// Filename of the blob within the thumbs namespace
    pub filename: String,
    /// MIME type, inherited from the original
    pub content_type: String,
    /// Filename of the source photo blob
    pub source_filename: String,
    /// Blob size in bytes
    pub size_bytes: i64,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// Fields for a new photo record
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub caption: Option<String>,
    pub user_id: String,
    pub business_id: String,
    pub size_bytes: i64,
}

/// Fields for a new thumbnail record
#[derive(Debug, Clone)]
pub struct NewThumbnail {
    pub id: Uuid,
    pub photo_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub source_filename: String,
    pub size_bytes: i64,
}

/// Metadata store over a PostgreSQL connection pool
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with a connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL metadata store");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert a new photo record
    #[instrument(skip(self, photo), fields(photo_id = %photo.id, filename = %photo.filename))]
    pub async fn insert_photo(&self, photo: &NewPhoto) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO photos (
                id, filename, content_type, caption,
                user_id, business_id, size_bytes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(photo.id)
        .bind(&photo.filename)
        .bind(&photo.content_type)
        .bind(&photo.caption)
        .bind(&photo.user_id)
        .bind(&photo.business_id)
        .bind(photo.size_bytes)
        .execute(&self.pool)
        .await?;

        metrics::counter!("storage.photos.indexed").increment(1);
        debug!("Photo record inserted");
        Ok(())
    }

    /// Get a photo record by blob id
    pub async fn get_photo(&self, id: Uuid) -> Result<Option<PhotoRecord>, StorageError> {
        let photo = sqlx::query_as::<_, PhotoRecord>(
            r#"
            SELECT id, filename, content_type, caption,
                   user_id, business_id, size_bytes, thumbnail_id, created_at
            FROM photos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(photo)
    }

    /// Get a photo record by blob filename
    pub async fn get_photo_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<PhotoRecord>, StorageError> {
        let photo = sqlx::query_as::<_, PhotoRecord>(
            r#"
            SELECT id, filename, content_type, caption,
                   user_id, business_id, size_bytes, thumbnail_id, created_at
            FROM photos
            WHERE filename = $1
            "#,
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(photo)
    }

    /// Insert a thumbnail record, idempotently.
    ///
    /// If a thumbnail already exists for the photo the insert is a
    /// no-op and the surviving record's id is returned, so a
    /// redelivered job can never produce a second thumbnail row.
    #[instrument(skip(self, thumbnail), fields(photo_id = %thumbnail.photo_id))]
    pub async fn insert_thumbnail(&self, thumbnail: &NewThumbnail) -> Result<Uuid, StorageError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO thumbnails (
                id, photo_id, filename, content_type,
                source_filename, size_bytes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (photo_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(thumbnail.id)
        .bind(thumbnail.photo_id)
        .bind(&thumbnail.filename)
        .bind(&thumbnail.content_type)
        .bind(&thumbnail.source_filename)
        .bind(thumbnail.size_bytes)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => {
                metrics::counter!("storage.thumbnails.indexed").increment(1);
                debug!(thumbnail_id = %id, "Thumbnail record inserted");
                Ok(id)
            }
            None => {
                // Lost the race or redelivered job: the existing row wins.
                let existing = self
                    .get_thumbnail_for_photo(thumbnail.photo_id)
                    .await?
                    .ok_or_else(|| {
                        StorageError::NotFound(format!(
                            "thumbnail for photo {}",
                            thumbnail.photo_id
                        ))
                    })?;
                debug!(thumbnail_id = %existing.id, "Thumbnail already recorded");
                Ok(existing.id)
            }
        }
    }

    /// Persist the thumbnail linkage on the photo record. Safe to apply
    /// twice: the update is a plain idempotent assignment.
    #[instrument(skip(self))]
    pub async fn link_thumbnail(
        &self,
        photo_id: Uuid,
        thumbnail_id: Uuid,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE photos
            SET thumbnail_id = $2
            WHERE id = $1
            "#,
        )
        .bind(photo_id)
        .bind(thumbnail_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the thumbnail record derived from a photo, if any
    pub async fn get_thumbnail_for_photo(
        &self,
        photo_id: Uuid,
    ) -> Result<Option<ThumbnailRecord>, StorageError> {
        let thumbnail = sqlx::query_as::<_, ThumbnailRecord>(
            r#"
            SELECT id, photo_id, filename, content_type,
                   source_filename, size_bytes, created_at
            FROM thumbnails
            WHERE photo_id = $1
            "#,
        )
        .bind(photo_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(thumbnail)
    }

    /// Get a thumbnail record by blob filename
    pub async fn get_thumbnail_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<ThumbnailRecord>, StorageError> {
        let thumbnail = sqlx::query_as::<_, ThumbnailRecord>(
            r#"
            SELECT id, photo_id, filename, content_type,
                   source_filename, size_bytes, created_at
            FROM thumbnails
            WHERE filename = $1
            "#,
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(thumbnail)
    }

    /// Delete a photo record. The foreign key cascades to its
    /// thumbnail record; blob cleanup is the caller's job.
    #[instrument(skip(self))]
    pub async fn delete_photo(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the connection pool (for readiness checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_photo_fields() {
        let photo = NewPhoto {
            id: Uuid::new_v4(),
            filename: "abc.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            caption: Some("cat".to_string()),
            user_id: "u1".to_string(),
            business_id: "b1".to_string(),
            size_bytes: 1024,
        };
        assert_eq!(photo.content_type, "image/jpeg");
        assert_eq!(photo.size_bytes, 1024);
    }

    #[test]
    fn test_records_serialize_with_snake_case_fields() {
        let record = ThumbnailRecord {
            id: Uuid::new_v4(),
            photo_id: Uuid::new_v4(),
            filename: "t.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            source_filename: "p.jpg".to_string(),
            size_bytes: 100,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("photo_id").is_some());
        assert!(json.get("source_filename").is_some());
    }
}
