//! Variant rendering: thumbnails and the preview watermark.

use image::imageops::{self, FilterType};
use image::RgbImage;

use super::cache::CacheVariant;

/// Label stamped on previews of assets the caller has not paid for.
pub const WATERMARK_TEXT: &str = "TOONIFY AI PREVIEW";

/// Opacity of the watermark over the image.
pub const WATERMARK_OPACITY: f32 = 0.4;

/// Default thumbnail width in pixels.
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 320;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// Render the given cached variant from a decoded base image.
pub fn render_variant(base: &RgbImage, kind: CacheVariant, thumb_width: u32) -> RgbImage {
    let sized = if kind.is_thumbnail() {
        thumbnail(base, thumb_width)
    } else {
        base.clone()
    };
    if kind.is_watermarked() {
        watermark(&sized)
    } else {
        sized
    }
}

/// Proportional downscale to `width`; narrower images are returned as is.
pub fn thumbnail(img: &RgbImage, width: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if width == 0 || w <= width {
        return img.clone();
    }
    let height = ((u64::from(h) * u64::from(width)) / u64::from(w)).max(1) as u32;
    imageops::resize(img, width, height, FilterType::Triangle)
}

/// Stamp [`WATERMARK_TEXT`] at 10% of the width, with its baseline at 90% of
/// the height. Glyph size follows `width / 1000`.
///
/// On images too short for a full glyph the baseline drops to the bottom
/// edge so the lower glyph rows still land on the image.
pub fn watermark(img: &RgbImage) -> RgbImage {
    let (w, h) = img.dimensions();
    let cell = ((3.0 * w as f32 / 1000.0).round() as u32).max(1);
    let baseline = (h * 9 / 10).max(GLYPH_HEIGHT * cell).min(h);
    let mut out = img.clone();
    draw_text(&mut out, WATERMARK_TEXT, w / 10, baseline, cell, WATERMARK_OPACITY);
    out
}

/// Width in pixels of `text` drawn with the given cell size.
pub fn text_width(text: &str, cell: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    (n * (GLYPH_WIDTH + 1) - 1) * cell
}

/// Blend bitmap text into `img`. `(x, baseline)` is the bottom-left corner
/// of the first glyph; pixels falling outside the image are skipped.
///
/// Ink is white over dark pixels and black over light ones, so every covered
/// pixel changes.
pub fn draw_text(
    img: &mut RgbImage,
    text: &str,
    x: u32,
    baseline: u32,
    cell: u32,
    opacity: f32,
) {
    let (w, h) = img.dimensions();
    let top = i64::from(baseline) - i64::from(GLYPH_HEIGHT * cell);

    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch) else { continue };
        let origin_x = i64::from(x) + i as i64 * i64::from((GLYPH_WIDTH + 1) * cell);

        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..cell {
                    for dx in 0..cell {
                        let px = origin_x + i64::from(col * cell + dx);
                        let py = top + row as i64 * i64::from(cell) + i64::from(dy);
                        if px < 0 || py < 0 || px >= i64::from(w) || py >= i64::from(h) {
                            continue;
                        }
                        let p = img.get_pixel_mut(px as u32, py as u32);
                        let ink = contrasting_ink(p.0);
                        for c in 0..3 {
                            let blended =
                                ink * opacity + f32::from(p.0[c]) * (1.0 - opacity);
                            p.0[c] = blended.round().clamp(0.0, 255.0) as u8;
                        }
                    }
                }
            }
        }
    }
}

/// Black over pixels brighter than mid-gray, white otherwise.
fn contrasting_ink(rgb: [u8; 3]) -> f32 {
    let luma = 0.299 * f32::from(rgb[0]) + 0.587 * f32::from(rgb[1]) + 0.114 * f32::from(rgb[2]);
    if luma > 127.5 {
        0.0
    } else {
        255.0
    }
}

/// 5x7 glyph rows, most significant of the low five bits is the left column.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch.to_ascii_uppercase() {
        ' ' => [0x00; 7],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn canvas(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([0, 0, 0]))
    }

    #[test]
    fn test_thumbnail_width_and_aspect() {
        let thumb = thumbnail(&canvas(640, 480), 320);
        assert_eq!(thumb.dimensions(), (320, 240));
    }

    #[test]
    fn test_thumbnail_never_upscales() {
        let img = canvas(200, 100);
        assert_eq!(thumbnail(&img, 320).dimensions(), (200, 100));
    }

    #[test]
    fn test_watermark_changes_pixels_near_anchor() {
        let img = canvas(200, 100);
        let marked = watermark(&img);
        assert_ne!(marked, img);

        // The text sits in the lower-left band, the top rows are untouched
        assert!((0..200).all(|x| marked.get_pixel(x, 0).0 == [0, 0, 0]));

        // Stamped pixels are blended, not opaque white
        let max = marked.pixels().map(|p| p.0[0]).max().unwrap();
        assert_eq!(max, (255.0 * WATERMARK_OPACITY).round() as u8);
    }

    #[test]
    fn test_watermark_marks_white_images() {
        let white = RgbImage::from_pixel(64, 48, Rgb([255, 255, 255]));
        let marked = watermark(&white);
        assert_ne!(marked, white);

        let min = marked.pixels().map(|p| p.0[0]).min().unwrap();
        assert_eq!(min, (255.0 * (1.0 - WATERMARK_OPACITY)).round() as u8);
    }

    #[test]
    fn test_watermark_marks_mixed_brightness() {
        let mut img = canvas(200, 100);
        for (x, _, p) in img.enumerate_pixels_mut() {
            if x % 2 == 0 {
                *p = Rgb([240, 240, 240]);
            }
        }
        let marked = watermark(&img);
        let darkened = marked
            .enumerate_pixels()
            .filter(|(x, _, p)| x % 2 == 0 && p.0[0] < 240)
            .count();
        let lightened = marked
            .enumerate_pixels()
            .filter(|(x, _, p)| x % 2 == 1 && p.0[0] > 0)
            .count();
        assert!(darkened > 0);
        assert!(lightened > 0);
    }

    #[test]
    fn test_watermark_marks_one_pixel_tall_images() {
        for img in [
            RgbImage::from_pixel(64, 1, Rgb([255, 255, 255])),
            canvas(64, 1),
            canvas(64, 3),
        ] {
            assert_ne!(watermark(&img), img, "{:?} left unmarked", img.dimensions());
        }
    }

    #[test]
    fn test_watermark_scales_with_width() {
        let count = |img: &RgbImage| img.pixels().filter(|p| p.0[0] > 0).count();
        let small = count(&watermark(&canvas(400, 200)));
        let large = count(&watermark(&canvas(2000, 1000)));
        assert!(large > small * 4);
    }

    #[test]
    fn test_render_variant_kinds() {
        let base = canvas(640, 320);
        assert_eq!(
            render_variant(&base, CacheVariant::Thumb, 320),
            thumbnail(&base, 320)
        );
        assert_eq!(
            render_variant(&base, CacheVariant::WatermarkedThumb, 320).dimensions(),
            (320, 160)
        );
        assert_eq!(
            render_variant(&base, CacheVariant::WatermarkedFull, 320).dimensions(),
            (640, 320)
        );
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("", 2), 0);
        assert_eq!(text_width("A", 1), 5);
        assert_eq!(text_width("AB", 2), 22);
        assert!(glyph('?').is_none());
        assert!(glyph('w').is_some());
    }
}
