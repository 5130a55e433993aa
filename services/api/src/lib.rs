//! Shutter API
//!
//! HTTP front of the photo pipeline: multipart photo upload (blob
//! write, metadata record, thumbnail job publish), photo detail and
//! deletion, and streaming media endpoints for originals and
//! thumbnails.

pub mod config;
pub mod error;
pub mod media;
pub mod routes;
pub mod upload;

pub use config::Config;
pub use error::ApiError;
pub use routes::{create_router, AppState};
