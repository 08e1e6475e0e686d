// src/capture/frame.rs
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat};
use std::path::Path;

/// JPEG quality used for camera snapshots
pub const SNAPSHOT_JPEG_QUALITY: u8 = 90;

/// Size used when the camera has not delivered a frame yet
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

/// Encode an image as JPEG bytes at the given quality
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .context("Failed to encode JPEG")?;
    Ok(buffer)
}

/// Build a `data:` URL carrying `bytes` as base64
pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

/// Split a base64 `data:` URL into its mime type and decoded bytes
pub fn from_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Not a data URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("Data URL has no payload"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow!("Data URL is not base64 encoded"))?;
    let bytes = general_purpose::STANDARD
        .decode(payload)
        .context("Data URL payload is not valid base64")?;
    Ok((mime.to_string(), bytes))
}

/// Snapshot a frame the way a canvas export does: JPEG data URL
pub fn snapshot_data_url(frame: &DynamicImage) -> Result<String> {
    let jpeg = encode_jpeg(frame, SNAPSHOT_JPEG_QUALITY)?;
    Ok(to_data_url("image/jpeg", &jpeg))
}

pub fn blank_frame() -> DynamicImage {
    DynamicImage::new_rgb8(DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT)
}

/// Pick a mime type for an uploaded file, by extension first and content second
pub fn guess_mime(path: &Path, bytes: &[u8]) -> String {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .and_then(|e| ImageFormat::from_extension(e.as_str()));
    let format = by_extension.or_else(|| image::guess_format(bytes).ok());
    format.map_or("application/octet-stream", mime_for).to_string()
}

fn mime_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([30, 140, 40])))
    }

    #[test]
    fn snapshot_is_a_jpeg_data_url() {
        let url = snapshot_data_url(&sample_image()).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let (mime, bytes) = from_data_url(&url).unwrap();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn rejects_urls_without_base64_payload() {
        assert!(from_data_url("https://example.com/leaf.jpg").is_err());
        assert!(from_data_url("data:image/jpeg,plain").is_err());
        assert!(from_data_url("data:image/jpeg;base64").is_err());
    }

    #[test]
    fn mime_from_extension_then_content() {
        assert_eq!(guess_mime(Path::new("leaf.PNG"), b""), "image/png");
        assert_eq!(guess_mime(Path::new("leaf.jpeg"), b""), "image/jpeg");

        let jpeg = encode_jpeg(&sample_image(), 80).unwrap();
        assert_eq!(guess_mime(Path::new("upload"), &jpeg), "image/jpeg");
        assert_eq!(guess_mime(Path::new("notes.txt"), b"hello"), "application/octet-stream");
    }

    #[test]
    fn blank_frame_uses_default_video_size() {
        let frame = blank_frame();
        assert_eq!((frame.width(), frame.height()), (640, 480));
    }
}
