// src/imaging.rs
//! Image sniffing and transcoding.
//!
//! Article images arrive as arbitrary remote bytes. Dimensions come from the
//! decoder's own probe when possible, otherwise from a 12-byte header sniff
//! covering JPEG, PNG, GIF, and WEBP. Every failure path returns the unknown
//! sentinel or `None`; nothing here retries and nothing panics on truncated
//! or corrupt buffers.

use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::ImageReader;
use tracing::warn;

use crate::store::BlobStore;

/// Pixel dimensions of an image. `{0, 0}` is the explicit "unknown"
/// sentinel and is never treated as a valid size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub const UNKNOWN: ImageDimensions = ImageDimensions {
        width: 0,
        height: 0,
    };

    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

fn u16_be(buf: &[u8], offset: usize) -> u32 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]]) as u32
}

fn u16_le(buf: &[u8], offset: usize) -> u32 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]]) as u32
}

fn u32_be(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Scan RIFF chunks from offset 12 for a `VP8 ` chunk and read the frame
/// dimensions at chunk-relative offsets 7/9 (little-endian).
fn sniff_webp(buf: &[u8]) -> ImageDimensions {
    let mut pos = 12usize;
    while pos + 7 <= buf.len() {
        let tag = &buf[pos..pos + 4];
        pos += 4;
        let chunk_size =
            u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], 0]) as usize;
        pos += 3;
        if tag == b"VP8 " {
            if pos + 11 <= buf.len() {
                let width = u16_le(buf, pos + 7);
                let height = u16_le(buf, pos + 9);
                if width > 0 && height > 0 {
                    return ImageDimensions { width, height };
                }
            }
            break;
        }
        pos += chunk_size;
    }
    ImageDimensions::UNKNOWN
}

/// Determine dimensions from a raw header sniff of the first 12 bytes.
/// Buffers under 12 bytes and unrecognized signatures return the sentinel.
pub fn sniff_dimensions(buf: &[u8]) -> ImageDimensions {
    if buf.len() < 12 {
        return ImageDimensions::UNKNOWN;
    }
    let header = &buf[..12];

    let is_jpg = header[0] == 0xff && header[1] == 0xd8 && header[2] == 0xff;
    if is_jpg {
        let width = u16_be(header, 6);
        let height = u16_be(header, 4);
        if width > 0 && height > 0 {
            return ImageDimensions { width, height };
        }
    }

    let is_png = header[0] == 0x89 && header[1] == 0x50 && header[2] == 0x4e && header[3] == 0x47;
    if is_png && buf.len() >= 24 {
        let width = u32_be(buf, 16);
        let height = u32_be(buf, 20);
        if width > 0 && height > 0 {
            return ImageDimensions { width, height };
        }
    }

    let is_gif = header.starts_with(b"GIF8")
        && (header[4] == b'7' || header[4] == b'9')
        && header[5] == b'a';
    if is_gif {
        let width = u16_le(header, 6);
        let height = u16_le(header, 8);
        if width > 0 && height > 0 {
            return ImageDimensions { width, height };
        }
    }

    let is_webp = header.starts_with(b"RIFF") && &header[8..12] == b"WEBP";
    if is_webp {
        return sniff_webp(buf);
    }

    ImageDimensions::UNKNOWN
}

/// Dimensions via the decoder's metadata probe first, header sniff second.
pub fn pixel_dimensions(buf: &[u8]) -> ImageDimensions {
    if let Ok(reader) = ImageReader::new(Cursor::new(buf)).with_guessed_format() {
        if let Ok((width, height)) = reader.into_dimensions() {
            if width > 0 && height > 0 {
                return ImageDimensions { width, height };
            }
        }
    }
    sniff_dimensions(buf)
}

/// Fetches remote images and produces resized WebP buffers: a full-size
/// rendition for blob storage and a tiny base64 placeholder for blurred
/// previews.
#[derive(Clone)]
pub struct ImagePipeline {
    client: reqwest::Client,
}

/// Width of the stored full-size rendition.
pub const FULL_IMAGE_WIDTH: u32 = 1200;
/// Height of the blurred placeholder rendition.
pub const PLACEHOLDER_HEIGHT: u32 = 10;

impl ImagePipeline {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Fetch `url` and re-encode it as WebP at the requested size. A zero
    /// width or height is derived from the aspect ratio of the original;
    /// both zero keeps the original size. Any fetch, sniff, decode, or
    /// encode failure yields `None`; callers treat that as "skip this
    /// article".
    pub async fn optimized_buffer(
        &self,
        url: &str,
        width: u32,
        height: u32,
    ) -> Option<Vec<u8>> {
        if url.is_empty() {
            return None;
        }
        let bytes = match self.client.get(url).send().await {
            Ok(resp) => match resp.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(url, error = ?e, "image body read failed");
                    return None;
                }
            },
            Err(e) => {
                warn!(url, error = ?e, "image fetch failed");
                return None;
            }
        };

        let original = pixel_dimensions(&bytes);
        if !original.is_known() {
            warn!(url, "could not determine image dimensions");
            return None;
        }

        let (mut width, mut height) = (width, height);
        if width == 0 && height == 0 {
            width = original.width;
            height = original.height;
        } else if width == 0 {
            width = ((original.width as f64) * (height as f64) / (original.height as f64))
                .round() as u32;
        } else if height == 0 {
            height = ((original.height as f64) * (width as f64) / (original.width as f64))
                .round() as u32;
        }

        let decoded = match image::load_from_memory(&bytes) {
            Ok(img) => img,
            Err(e) => {
                warn!(url, error = ?e, "image decode failed");
                return None;
            }
        };

        let resized = decoded.resize_exact(width.max(1), height.max(1), FilterType::Triangle);
        let mut out = Vec::new();
        let encoder = WebPEncoder::new_lossless(&mut out);
        if let Err(e) = resized.into_rgba8().write_with_encoder(encoder) {
            warn!(url, error = ?e, "webp encode failed");
            return None;
        }
        Some(out)
    }

    /// Produce the small blurred-preview rendition as a base64 data URI.
    /// Empty string on failure.
    pub async fn placeholder_data_uri(&self, url: &str) -> String {
        match self.optimized_buffer(url, 0, PLACEHOLDER_HEIGHT).await {
            Some(buf) => format!("data:image/webp;base64,{}", BASE64.encode(buf)),
            None => String::new(),
        }
    }

    /// Transcode the full-size rendition and upload it to the blob store,
    /// keyed by the article source so removal stays easy. Empty string on
    /// failure.
    pub async fn store_full_image(
        &self,
        blobs: &dyn BlobStore,
        url: &str,
        source: &str,
    ) -> String {
        let Some(buf) = self.optimized_buffer(url, FULL_IMAGE_WIDTH, 0).await else {
            return String::new();
        };
        let path = format!("articles/{}.webp", urlencoding::encode(source));
        match blobs.put(&path, buf).await {
            Ok(stored_url) => stored_url,
            Err(e) => {
                warn!(url, source, error = ?e, "blob upload failed");
                String::new()
            }
        }
    }
}
