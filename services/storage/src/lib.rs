//! Shutter Storage
//!
//! Storage layer shared by the upload API and the thumbnail worker:
//!
//! - [`BlobStore`]: S3-backed content store with streamed reads and
//!   writes, generated-id keys, attached metadata, and the two
//!   namespaces `photos` and `thumbs`
//! - [`MetadataStore`]: PostgreSQL records for photos and thumbnails,
//!   including the idempotent thumbnail linkage the worker persists

pub mod blob_store;
pub mod config;
pub mod error;
pub mod metadata_store;

pub use blob_store::{BlobDownload, BlobStore, Namespace};
pub use config::{BlobConfig, DatabaseConfig};
pub use error::StorageError;
pub use metadata_store::{MetadataStore, NewPhoto, NewThumbnail, PhotoRecord, ThumbnailRecord};
