//! Brightness, contrast and color-balance descriptors.

use image::RgbImage;
use serde::Serialize;

use super::raster::luma;

/// Share of each channel in the summed channel means, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorBalance {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

/// Summary statistics reported alongside a processed image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageStats {
    /// Mean luma (0-255)
    pub brightness: f64,
    /// Standard deviation of luma
    pub contrast: f64,
    pub color_balance: ColorBalance,
}

impl ImageStats {
    pub fn of(img: &RgbImage) -> Self {
        let n = (u64::from(img.width()) * u64::from(img.height())).max(1) as f64;

        let mut sum = [0f64; 3];
        let mut luma_sum = 0f64;
        let mut luma_sq = 0f64;
        for px in img.pixels() {
            let [r, g, b] = px.0;
            sum[0] += f64::from(r);
            sum[1] += f64::from(g);
            sum[2] += f64::from(b);
            let l = f64::from(luma(r, g, b));
            luma_sum += l;
            luma_sq += l * l;
        }

        let brightness = luma_sum / n;
        let contrast = (luma_sq / n - brightness * brightness).max(0.0).sqrt();

        let total: f64 = sum.iter().sum();
        let color_balance = if total > 0.0 {
            ColorBalance {
                r: round_to(sum[0] / total * 100.0, 1),
                g: round_to(sum[1] / total * 100.0, 1),
                b: round_to(sum[2] / total * 100.0, 1),
            }
        } else {
            // No channel carries any weight: report an even split
            let third = round_to(100.0 / 3.0, 1);
            ColorBalance {
                r: third,
                g: third,
                b: third,
            }
        };

        Self {
            brightness: round_to(brightness, 2),
            contrast: round_to(contrast, 2),
            color_balance,
        }
    }
}

fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}
