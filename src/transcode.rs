//! Image transcoding seam.
//!
//! The pipeline normalizes every internalized image through an
//! [`ImageTranscoder`]. [`StandardTranscoder`] decodes with the `image`
//! crate, caps the longest edge, and re-encodes as JPEG;
//! [`PassthroughTranscoder`] keeps the source bytes for pre-optimized
//! feeds and for tests that use synthetic payloads.

use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("imagem inválida: {0}")]
    Decode(String),
    #[error("falha ao re-codificar imagem: {0}")]
    Encode(String),
}

/// A transcoded payload ready for upload.
#[derive(Debug, Clone)]
pub struct TranscodedImage {
    pub bytes: Vec<u8>,
    /// Extension used in the deterministic destination key
    pub extension: &'static str,
    pub content_type: &'static str,
}

pub trait ImageTranscoder: Send + Sync {
    fn transcode(&self, bytes: &[u8]) -> Result<TranscodedImage, TranscodeError>;
}

/// Decode, bound the longest edge to `max_dimension`, re-encode JPEG.
pub struct StandardTranscoder {
    max_dimension: u32,
}

impl StandardTranscoder {
    #[must_use]
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl ImageTranscoder for StandardTranscoder {
    fn transcode(&self, bytes: &[u8]) -> Result<TranscodedImage, TranscodeError> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| TranscodeError::Decode(e.to_string()))?;

        let bounded = if decoded.width() > self.max_dimension || decoded.height() > self.max_dimension
        {
            decoded.resize(
                self.max_dimension,
                self.max_dimension,
                image::imageops::FilterType::Lanczos3,
            )
        } else {
            decoded
        };

        // JPEG carries no alpha channel
        let rgb = image::DynamicImage::ImageRgb8(bounded.to_rgb8());

        let mut out = Cursor::new(Vec::new());
        rgb.write_to(&mut out, image::ImageFormat::Jpeg)
            .map_err(|e| TranscodeError::Encode(e.to_string()))?;

        Ok(TranscodedImage {
            bytes: out.into_inner(),
            extension: "jpg",
            content_type: "image/jpeg",
        })
    }
}

/// Keeps the payload as-is, sniffing the extension from magic bytes.
pub struct PassthroughTranscoder;

impl ImageTranscoder for PassthroughTranscoder {
    fn transcode(&self, bytes: &[u8]) -> Result<TranscodedImage, TranscodeError> {
        let (extension, content_type) = sniff_format(bytes);
        Ok(TranscodedImage {
            bytes: bytes.to_vec(),
            extension,
            content_type,
        })
    }
}

/// Extension + MIME from the payload's magic bytes, defaulting to JPEG.
fn sniff_format(bytes: &[u8]) -> (&'static str, &'static str) {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        ("png", "image/png")
    } else if bytes.starts_with(b"GIF8") {
        ("gif", "image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ("webp", "image/webp")
    } else {
        ("jpg", "image/jpeg")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_png() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_format(&png).0, "png");
    }

    #[test]
    fn test_sniff_webp() {
        let mut webp = b"RIFF".to_vec();
        webp.extend_from_slice(&[0, 0, 0, 0]);
        webp.extend_from_slice(b"WEBP");
        assert_eq!(sniff_format(&webp).0, "webp");
    }

    #[test]
    fn test_sniff_defaults_to_jpeg() {
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF]).0, "jpg");
        assert_eq!(sniff_format(b"anything").0, "jpg");
    }

    #[test]
    fn test_passthrough_keeps_bytes() {
        let out = PassthroughTranscoder.transcode(b"raw-bytes").unwrap();
        assert_eq!(out.bytes, b"raw-bytes");
        assert_eq!(out.extension, "jpg");
    }

    #[test]
    fn test_standard_rejects_garbage() {
        let err = StandardTranscoder::new(1600).transcode(b"not an image").unwrap_err();
        assert!(matches!(err, TranscodeError::Decode(_)));
    }

    #[test]
    fn test_standard_bounds_and_reencodes() {
        // 4x2 solid-color source, synthesized in memory
        let src = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            4,
            2,
            image::Rgb([200, 10, 10]),
        ));
        let mut png = Cursor::new(Vec::new());
        src.write_to(&mut png, image::ImageFormat::Png).unwrap();

        let out = StandardTranscoder::new(2).transcode(&png.into_inner()).unwrap();
        assert_eq!(out.extension, "jpg");

        let round = image::load_from_memory(&out.bytes).unwrap();
        assert!(round.width() <= 2 && round.height() <= 2);
    }
}
