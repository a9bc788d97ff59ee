//! Decoding, container detection and resolution bounding.
//!
//! Caller bytes are sniffed by magic number before decoding so that
//! unsupported containers fail fast with [`StyleError::InvalidImage`]
//! instead of reaching a decoder.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat, ImageReader, Luma, RgbImage};

use crate::error::StyleError;

/// JPEG start-of-image marker followed by the first segment marker byte.
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// PNG file signature.
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

// =============================================================================
// Container Detection
// =============================================================================

/// Image containers accepted as stylization input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Jpeg,
    Png,
}

impl InputFormat {
    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            InputFormat::Jpeg => "JPEG",
            InputFormat::Png => "PNG",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            InputFormat::Jpeg => ImageFormat::Jpeg,
            InputFormat::Png => ImageFormat::Png,
        }
    }
}

/// Detect the container of caller-supplied bytes from their magic number.
pub fn detect_format(bytes: &[u8]) -> Result<InputFormat, StyleError> {
    if bytes.is_empty() {
        return Err(StyleError::invalid("empty input"));
    }
    if bytes.starts_with(JPEG_MAGIC) {
        Ok(InputFormat::Jpeg)
    } else if bytes.starts_with(PNG_MAGIC) {
        Ok(InputFormat::Png)
    } else {
        Err(StyleError::invalid(
            "unsupported container (expected JPEG or PNG)",
        ))
    }
}

/// Decode JPEG/PNG bytes into an RGB buffer.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, StyleError> {
    let format = detect_format(bytes)?;

    let reader = ImageReader::with_format(Cursor::new(bytes), format.image_format());
    let decoded = reader
        .decode()
        .map_err(|e| StyleError::invalid(format!("{} decode failed: {}", format.name(), e)))?;

    let rgb = decoded.into_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(StyleError::invalid("image has zero width or height"));
    }
    Ok(rgb)
}

// =============================================================================
// Resolution Bounding
// =============================================================================

/// Dimensions of `(width, height)` scaled down to fit `(max_w, max_h)`.
///
/// Aspect ratio is preserved and images already inside the bounds are left
/// alone. Integer arithmetic keeps the binding side exactly at its bound.
pub fn fit_dimensions(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }

    let (w, h) = (u64::from(width), u64::from(height));
    let (mw, mh) = (u64::from(max_w), u64::from(max_h));

    // mw / w <= mh / h  <=>  mw * h <= mh * w
    let (new_w, new_h) = if mw * h <= mh * w {
        (mw, h * mw / w)
    } else {
        (w * mh / h, mh)
    };

    (new_w.max(1) as u32, new_h.max(1) as u32)
}

/// Downscale an image so that it fits inside the given bounds.
pub fn fit_within(image: RgbImage, max_w: u32, max_h: u32) -> RgbImage {
    let (w, h) = fit_dimensions(image.width(), image.height(), max_w, max_h);
    if (w, h) == image.dimensions() {
        return image;
    }
    imageops::resize(&image, w, h, FilterType::Triangle)
}

// =============================================================================
// Pixel Helpers
// =============================================================================

/// Rec.601 luma of an RGB triple.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)
}

/// Round and clamp a float into the 0-255 range.
#[inline]
pub fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Rec.601 grayscale conversion.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        Luma([to_u8(luma(r, g, b))])
    })
}

/// Replicate a grayscale buffer into three channels.
pub fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        image::Rgb([v, v, v])
    })
}

/// Invert every sample.
pub fn invert_gray(gray: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    for v in out.iter_mut() {
        *v = 255 - *v;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder};

    fn sample(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| image::Rgb([(x * 7) as u8, (y * 5) as u8, 90]))
    }

    fn jpeg_bytes(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, 90)
            .encode_image(img)
            .unwrap();
        buf
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(&jpeg_bytes(&sample(4, 4))).unwrap(), InputFormat::Jpeg);

        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(sample(4, 4).as_raw(), 4, 4, ExtendedColorType::Rgb8)
            .unwrap();
        assert_eq!(detect_format(&png).unwrap(), InputFormat::Png);

        assert!(detect_format(b"GIF89a").is_err());
        assert!(detect_format(&[]).is_err());
    }

    #[test]
    fn test_decode_round_trip_dimensions() {
        let img = decode(&jpeg_bytes(&sample(40, 30))).unwrap();
        assert_eq!(img.dimensions(), (40, 30));
    }

    #[test]
    fn test_decode_truncated_jpeg() {
        let mut bytes = jpeg_bytes(&sample(40, 30));
        bytes.truncate(20);
        match decode(&bytes) {
            Err(StyleError::InvalidImage { .. }) => {}
            other => panic!("expected InvalidImage, got {:?}", other.map(|i| i.dimensions())),
        }
    }

    #[test]
    fn test_fit_dimensions() {
        // Already inside the bounds
        assert_eq!(fit_dimensions(800, 600, 1280, 720), (800, 600));
        // Width binds
        assert_eq!(fit_dimensions(2560, 1440, 1280, 720), (1280, 720));
        assert_eq!(fit_dimensions(4000, 1000, 1280, 720), (1280, 320));
        // Height binds
        assert_eq!(fit_dimensions(1000, 2000, 1280, 720), (360, 720));
        assert_eq!(fit_dimensions(200, 150, 96, 64), (85, 64));
        // Never collapses to zero
        assert_eq!(fit_dimensions(10_000, 1, 100, 100), (100, 1));
    }

    #[test]
    fn test_fit_within_keeps_small_images() {
        let img = sample(20, 10);
        let out = fit_within(img.clone(), 100, 100);
        assert_eq!(out, img);

        let out = fit_within(sample(200, 100), 100, 100);
        assert_eq!(out.dimensions(), (100, 50));
    }

    #[test]
    fn test_gray_conversion() {
        let img = RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255]));
        assert!(to_gray(&img).iter().all(|&v| v == 255));

        let img = RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0]));
        assert_eq!(to_gray(&img).get_pixel(0, 0).0[0], 76);
    }
}
