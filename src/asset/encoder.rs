//! Output encoders for processed images.
//!
//! Base assets and cached variants are JPEG. Downloads may additionally be
//! converted to PNG or to a single-page PDF, and the breathing animation is
//! encoded as a looping GIF.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{Delay, DynamicImage, ExtendedColorType, Frame, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::StyleError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Display time of each animation frame.
pub const FRAME_DELAY: Duration = Duration::from_millis(80);

// =============================================================================
// Output Formats
// =============================================================================

/// Download container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    Pdf,
    Gif,
}

impl OutputFormat {
    pub const fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Gif => "image/gif",
        }
    }

    pub const fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Gif => "gif",
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Gif => "gif",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "pdf" => Ok(OutputFormat::Pdf),
            "gif" => Ok(OutputFormat::Gif),
            other => Err(format!("unsupported output format: {}", other)),
        }
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// Stateless encoder for all output containers.
#[derive(Debug, Clone, Default)]
pub struct AssetEncoder;

impl AssetEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode an image in the given still format.
    ///
    /// GIF requests produce a single-frame image; use
    /// [`AssetEncoder::encode_animation`] for animated output.
    pub fn encode(
        &self,
        image: &RgbImage,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, StyleError> {
        match format {
            OutputFormat::Jpeg => self.encode_jpeg(image, quality),
            OutputFormat::Png => self.encode_png(image),
            OutputFormat::Pdf => self.encode_pdf(image, quality),
            OutputFormat::Gif => self.encode_animation(std::slice::from_ref(image)),
        }
    }

    /// JPEG at the given quality (clamped to 1-100).
    pub fn encode_jpeg(&self, image: &RgbImage, quality: u8) -> Result<Bytes, StyleError> {
        let quality = clamp_quality(quality);
        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, quality)
            .encode_image(image)
            .map_err(encode_error)?;
        Ok(Bytes::from(output))
    }

    pub fn encode_png(&self, image: &RgbImage) -> Result<Bytes, StyleError> {
        let mut output = Vec::new();
        PngEncoder::new(&mut output)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(encode_error)?;
        Ok(Bytes::from(output))
    }

    /// Single-page PDF with the image as a DCT (JPEG) stream, one point per
    /// pixel.
    pub fn encode_pdf(&self, image: &RgbImage, quality: u8) -> Result<Bytes, StyleError> {
        let jpeg = self.encode_jpeg(image, quality)?;
        Ok(Bytes::from(build_pdf(&jpeg, image.width(), image.height())))
    }

    /// Looping GIF, [`FRAME_DELAY`] per frame.
    pub fn encode_animation(&self, frames: &[RgbImage]) -> Result<Bytes, StyleError> {
        if frames.is_empty() {
            return Err(StyleError::Encode {
                message: "animation has no frames".to_string(),
            });
        }

        let mut output = Vec::new();
        {
            let mut encoder = GifEncoder::new_with_speed(&mut output, 10);
            encoder.set_repeat(Repeat::Infinite).map_err(encode_error)?;
            let delay = Delay::from_saturating_duration(FRAME_DELAY);
            for frame in frames {
                let rgba = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
                encoder
                    .encode_frame(Frame::from_parts(rgba, 0, 0, delay))
                    .map_err(encode_error)?;
            }
        }
        Ok(Bytes::from(output))
    }

    /// Decode a stored JPEG/PNG asset back into pixels.
    pub fn decode(&self, data: &[u8]) -> Result<RgbImage, StyleError> {
        crate::style::decode(data)
    }

    /// Dimensions of an encoded image without decoding the pixel data.
    pub fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), StyleError> {
        image::ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| StyleError::invalid(e.to_string()))?
            .into_dimensions()
            .map_err(|e| StyleError::invalid(e.to_string()))
    }
}

fn encode_error(e: image::ImageError) -> StyleError {
    StyleError::Encode {
        message: e.to_string(),
    }
}

// =============================================================================
// PDF
// =============================================================================

/// Minimal PDF 1.4 document: catalog, one page, one image XObject.
fn build_pdf(jpeg: &[u8], width: u32, height: u32) -> Vec<u8> {
    let content = format!("q\n{} 0 0 {} 0 0 cm\n/Im0 Do\nQ\n", width, height);

    let mut out: Vec<u8> = Vec::with_capacity(jpeg.len() + 1024);
    let mut offsets = Vec::with_capacity(5);

    out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");

    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");

    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
             /Resources << /XObject << /Im0 4 0 R >> >> /Contents 5 0 R >>\nendobj\n",
            width, height
        )
        .as_bytes(),
    );

    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj\n<< /Type /XObject /Subtype /Image /Width {} /Height {} \
             /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>\nstream\n",
            width,
            height,
            jpeg.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "5 0 obj\n<< /Length {} >>\nstream\n{}endstream\nendobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );

    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref
        )
        .as_bytes(),
    );
    out
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp JPEG quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
