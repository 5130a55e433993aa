//! Shutter Worker
//!
//! Consumes thumbnail jobs from the photo queue, renders a thumbnail
//! for each stored photo, and persists the result: thumbnail blob in
//! the `thumbs` namespace, thumbnail record in the metadata store, and
//! the linkage on the photo row. Jobs are acknowledged only after all
//! of that has happened.

pub mod config;
pub mod processor;
pub mod resize;

pub use config::{Config, ThumbnailConfig};
pub use processor::{MediaBlobs, MediaIndex, ThumbnailProcessor};
pub use resize::{render_thumbnail, ThumbnailError};
