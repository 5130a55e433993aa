//! Thumbnail rendering.
//!
//! Thumbnails are re-encoded in the source image's format so the
//! stored content type stays truthful. The default rendering is an
//! exact resize to the configured dimensions; `preserve_aspect` fits
//! the image within the target box instead.

use crate::config::ThumbnailConfig;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

/// Errors from thumbnail rendering
#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("Unsupported content type: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode thumbnail: {0}")]
    Encode(String),
}

/// Render a thumbnail from original image bytes.
///
/// All failures here are deterministic properties of the input bytes,
/// so callers should treat them as permanent rather than retryable.
pub fn render_thumbnail(
    bytes: &[u8],
    content_type: &str,
    config: &ThumbnailConfig,
) -> Result<Vec<u8>, ThumbnailError> {
    let format = ImageFormat::from_mime_type(content_type)
        .ok_or_else(|| ThumbnailError::UnsupportedFormat(content_type.to_string()))?;

    let original =
        image::load_from_memory(bytes).map_err(|e| ThumbnailError::Decode(e.to_string()))?;

    let thumbnail = if config.preserve_aspect {
        original.resize(config.width, config.height, FilterType::Triangle)
    } else {
        original.resize_exact(config.width, config.height, FilterType::Triangle)
    };

    encode(thumbnail, format)
}

fn encode(thumbnail: DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ThumbnailError> {
    // JPEG has no alpha channel; flatten before encoding.
    let thumbnail = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(thumbnail.to_rgb8()),
        _ => thumbnail,
    };

    let mut buffer = Cursor::new(Vec::new());
    thumbnail
        .write_to(&mut buffer, format)
        .map_err(|e| ThumbnailError::Encode(e.to_string()))?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 40, 200]),
        ));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([10, 180, 90]),
        ));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_exact_resize_ignores_aspect_ratio() {
        let config = ThumbnailConfig::default();
        let source = png_bytes(400, 150);

        let rendered = render_thumbnail(&source, "image/png", &config).unwrap();
        let thumb = image::load_from_memory(&rendered).unwrap();
        assert_eq!(thumb.width(), 100);
        assert_eq!(thumb.height(), 100);
    }

    #[test]
    fn test_preserve_aspect_fits_within_box() {
        let config = ThumbnailConfig {
            preserve_aspect: true,
            ..Default::default()
        };
        let source = png_bytes(400, 200);

        let rendered = render_thumbnail(&source, "image/png", &config).unwrap();
        let thumb = image::load_from_memory(&rendered).unwrap();
        assert_eq!(thumb.width(), 100);
        assert_eq!(thumb.height(), 50);
    }

    #[test]
    fn test_jpeg_round_trip() {
        let config = ThumbnailConfig::default();
        let source = jpeg_bytes(320, 240);

        let rendered = render_thumbnail(&source, "image/jpeg", &config).unwrap();
        let format = image::guess_format(&rendered).unwrap();
        assert_eq!(format, ImageFormat::Jpeg);

        let thumb = image::load_from_memory(&rendered).unwrap();
        assert_eq!(thumb.width(), 100);
        assert_eq!(thumb.height(), 100);
    }

    #[test]
    fn test_upscales_small_images() {
        let config = ThumbnailConfig::default();
        let source = png_bytes(40, 40);

        let rendered = render_thumbnail(&source, "image/png", &config).unwrap();
        let thumb = image::load_from_memory(&rendered).unwrap();
        assert_eq!(thumb.width(), 100);
        assert_eq!(thumb.height(), 100);
    }

    #[test]
    fn test_undecodable_bytes_fail() {
        let config = ThumbnailConfig::default();
        let result = render_thumbnail(b"not an image", "image/png", &config);
        assert!(matches!(result, Err(ThumbnailError::Decode(_))));
    }

    #[test]
    fn test_unsupported_content_type_fails() {
        let config = ThumbnailConfig::default();
        let result = render_thumbnail(&png_bytes(10, 10), "application/pdf", &config);
        assert!(matches!(result, Err(ThumbnailError::UnsupportedFormat(_))));
    }
}
