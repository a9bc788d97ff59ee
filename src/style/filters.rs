//! Spatial filters shared by the stylization pipelines.
//!
//! All filters operate on 8-bit `image` buffers and clamp at the borders.
//! Separable Gaussian blurs accumulate in `f32`; the edge-preserving filters
//! work on normalized `[0, 1]` planes.

use image::{GrayImage, ImageBuffer, Luma, Pixel, RgbImage};

use super::raster::to_u8;

// =============================================================================
// Kernel Helpers
// =============================================================================

/// Sigma used for a Gaussian of the given aperture when none is specified.
#[inline]
pub fn sigma_for_ksize(ksize: u32) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Smallest odd integer `>= max(value, min)`.
#[inline]
pub fn odd_at_least(value: f32, min: u32) -> u32 {
    let v = (value.max(0.0) as u32).max(min);
    if v % 2 == 0 {
        v + 1
    } else {
        v
    }
}

/// Normalized 1-D Gaussian kernel of odd length `ksize`.
pub fn gaussian_kernel(ksize: u32, sigma: f32) -> Vec<f32> {
    let ksize = ksize.max(1) | 1;
    let radius = (ksize / 2) as i32;
    let denom = 2.0 * sigma * sigma;

    let mut weights: Vec<f32> = (-radius..=radius)
        .map(|i| {
            let x = i as f32;
            (-x * x / denom).exp()
        })
        .collect();

    let sum: f32 = weights.iter().sum();
    if sum > 0.0 {
        for w in &mut weights {
            *w /= sum;
        }
    }
    weights
}

// =============================================================================
// Gaussian Blur
// =============================================================================

/// Separable Gaussian blur with an odd aperture and the default sigma.
pub fn gaussian_blur<P>(img: &ImageBuffer<P, Vec<u8>>, ksize: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    gaussian_blur_sigma(img, ksize, sigma_for_ksize(ksize))
}

/// Separable Gaussian blur with an explicit sigma.
pub fn gaussian_blur_sigma<P>(
    img: &ImageBuffer<P, Vec<u8>>,
    ksize: u32,
    sigma: f32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let mut out = img.clone();
    if ksize <= 1 {
        return out;
    }

    let kernel = gaussian_kernel(ksize, sigma);
    let (w, h) = img.dimensions();
    let channels = usize::from(P::CHANNEL_COUNT);

    let tmp = horizontal_pass(img.as_raw(), w as usize, h as usize, channels, &kernel);
    vertical_pass(&tmp, &mut out, w as usize, h as usize, channels, &kernel);
    out
}

fn horizontal_pass(src: &[u8], w: usize, h: usize, ch: usize, k: &[f32]) -> Vec<f32> {
    let radius = (k.len() / 2) as isize;
    let mut dst = vec![0f32; src.len()];
    for y in 0..h {
        let row = y * w * ch;
        for x in 0..w {
            for c in 0..ch {
                let mut acc = 0f32;
                for (ki, &kw) in k.iter().enumerate() {
                    let sx = (x as isize + ki as isize - radius).clamp(0, w as isize - 1) as usize;
                    acc += kw * f32::from(src[row + sx * ch + c]);
                }
                dst[row + x * ch + c] = acc;
            }
        }
    }
    dst
}

fn vertical_pass(src: &[f32], dst: &mut [u8], w: usize, h: usize, ch: usize, k: &[f32]) {
    let radius = (k.len() / 2) as isize;
    for y in 0..h {
        for x in 0..w {
            for c in 0..ch {
                let mut acc = 0f32;
                for (ki, &kw) in k.iter().enumerate() {
                    let sy = (y as isize + ki as isize - radius).clamp(0, h as isize - 1) as usize;
                    acc += kw * src[(sy * w + x) * ch + c];
                }
                dst[(y * w + x) * ch + c] = to_u8(acc);
            }
        }
    }
}

// =============================================================================
// Median Blur
// =============================================================================

/// Per-channel median over a `ksize` x `ksize` window.
pub fn median_blur<P>(img: &ImageBuffer<P, Vec<u8>>, ksize: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let mut out = img.clone();
    if ksize <= 1 {
        return out;
    }

    let (w, h) = (img.width() as isize, img.height() as isize);
    let ch = usize::from(P::CHANNEL_COUNT);
    let radius = (ksize / 2) as isize;
    let src = img.as_raw();
    let mut window = Vec::with_capacity((ksize * ksize) as usize);
    let dst: &mut [u8] = &mut out;

    for y in 0..h {
        for x in 0..w {
            for c in 0..ch {
                window.clear();
                for dy in -radius..=radius {
                    let sy = (y + dy).clamp(0, h - 1);
                    for dx in -radius..=radius {
                        let sx = (x + dx).clamp(0, w - 1);
                        window.push(src[(sy * w + sx) as usize * ch + c]);
                    }
                }
                let mid = window.len() / 2;
                let (_, median, _) = window.select_nth_unstable(mid);
                dst[(y * w + x) as usize * ch + c] = *median;
            }
        }
    }
    out
}

// =============================================================================
// Edge-Preserving Smoothing
// =============================================================================

/// Number of horizontal+vertical passes of the recursive domain filter.
const DOMAIN_ITERATIONS: u32 = 3;

/// Edge-preserving smoothing via the recursive domain-transform filter.
///
/// `sigma_s` is the spatial extent in pixels, `sigma_r` the range extent on
/// normalized `[0, 1]` intensities.
pub fn edge_preserving(img: &RgbImage, sigma_s: f32, sigma_r: f32) -> RgbImage {
    let plane = domain_filter(img, sigma_s, sigma_r);
    plane_to_rgb(&plane, img.width(), img.height())
}

/// Edge-aware abstraction: domain filtering followed by darkening of the
/// strongest gradients so that region boundaries read as soft strokes.
pub fn stylization(img: &RgbImage, sigma_s: f32, sigma_r: f32) -> RgbImage {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut plane = domain_filter(img, sigma_s, sigma_r);

    let mut magnitude = vec![0f32; w * h];
    let mut channel = vec![0f32; w * h];
    for c in 0..3 {
        for (dst, px) in channel.iter_mut().zip(plane.iter()) {
            *dst = px[c];
        }
        let (gx, gy) = sobel(&channel, w, h);
        for (m, (x, y)) in magnitude.iter_mut().zip(gx.iter().zip(gy.iter())) {
            *m += (x * x + y * y).sqrt() / 3.0;
        }
    }

    let (lo, hi) = magnitude
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &m| (lo.min(m), hi.max(m)));
    let range = hi - lo;
    if range > f32::EPSILON {
        for (px, m) in plane.iter_mut().zip(magnitude.iter()) {
            let keep = 1.0 - (m - lo) / range;
            for v in px.iter_mut() {
                *v *= keep;
            }
        }
    }

    plane_to_rgb(&plane, img.width(), img.height())
}

/// Recursive domain-transform filter, returning a normalized RGB plane.
pub(crate) fn domain_filter(img: &RgbImage, sigma_s: f32, sigma_r: f32) -> Vec<[f32; 3]> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut plane: Vec<[f32; 3]> = img
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            [
                f32::from(r) / 255.0,
                f32::from(g) / 255.0,
                f32::from(b) / 255.0,
            ]
        })
        .collect();

    let ratio = sigma_s / sigma_r.max(1e-4);
    let diff = |a: &[f32; 3], b: &[f32; 3]| {
        (a[0] - b[0]).abs() + (a[1] - b[1]).abs() + (a[2] - b[2]).abs()
    };

    // dh[i] is the transformed distance between pixel i and its left
    // neighbour, dv[i] between pixel i and the one above.
    let mut dh = vec![1f32; w * h];
    let mut dv = vec![1f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            if x > 0 {
                dh[i] = 1.0 + ratio * diff(&plane[i], &plane[i - 1]);
            }
            if y > 0 {
                dv[i] = 1.0 + ratio * diff(&plane[i], &plane[i - w]);
            }
        }
    }

    let n = DOMAIN_ITERATIONS as i32;
    let norm = (4f32.powi(n) - 1.0).sqrt();
    for i in 0..n {
        let sigma_h = sigma_s * 3f32.sqrt() * 2f32.powi(n - i - 1) / norm;
        let ln_a = -(2f32.sqrt()) / sigma_h;

        for y in 0..h {
            let row = y * w;
            for x in 1..w {
                let v = (ln_a * dh[row + x]).exp();
                blend_towards(&mut plane, row + x, row + x - 1, v);
            }
            for x in (0..w.saturating_sub(1)).rev() {
                let v = (ln_a * dh[row + x + 1]).exp();
                blend_towards(&mut plane, row + x, row + x + 1, v);
            }
        }

        for x in 0..w {
            for y in 1..h {
                let v = (ln_a * dv[y * w + x]).exp();
                blend_towards(&mut plane, y * w + x, (y - 1) * w + x, v);
            }
            for y in (0..h.saturating_sub(1)).rev() {
                let v = (ln_a * dv[(y + 1) * w + x]).exp();
                blend_towards(&mut plane, y * w + x, (y + 1) * w + x, v);
            }
        }
    }

    plane
}

#[inline]
fn blend_towards(plane: &mut [[f32; 3]], target: usize, source: usize, v: f32) {
    let src = plane[source];
    let dst = &mut plane[target];
    for c in 0..3 {
        dst[c] += v * (src[c] - dst[c]);
    }
}

pub(crate) fn plane_to_rgb(plane: &[[f32; 3]], w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        let px = plane[(y * w + x) as usize];
        image::Rgb([
            to_u8(px[0] * 255.0),
            to_u8(px[1] * 255.0),
            to_u8(px[2] * 255.0),
        ])
    })
}

// =============================================================================
// Edge Maps
// =============================================================================

/// 3x3 Sobel derivatives of a single-channel float plane.
pub fn sobel(plane: &[f32], w: usize, h: usize) -> (Vec<f32>, Vec<f32>) {
    let mut gx = vec![0f32; w * h];
    let mut gy = vec![0f32; w * h];
    if w == 0 || h == 0 {
        return (gx, gy);
    }

    let at = |x: isize, y: isize| {
        let x = x.clamp(0, w as isize - 1) as usize;
        let y = y.clamp(0, h as isize - 1) as usize;
        plane[y * w + x]
    };

    for y in 0..h as isize {
        for x in 0..w as isize {
            let i = y as usize * w + x as usize;
            gx[i] = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            gy[i] = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
        }
    }
    (gx, gy)
}

/// Binary ink mask from Gaussian-weighted local thresholding.
///
/// A pixel becomes white (255) when it is brighter than its neighbourhood
/// mean minus `c`; darker detail becomes black ink.
pub fn adaptive_threshold(gray: &GrayImage, block_size: u32, c: f32) -> GrayImage {
    let block_size = block_size.max(3) | 1;
    let mean = gaussian_blur(gray, block_size);

    let mut out = gray.clone();
    for (dst, (&src, &m)) in out
        .iter_mut()
        .zip(gray.as_raw().iter().zip(mean.as_raw().iter()))
    {
        *dst = if f32::from(src) > f32::from(m) - c {
            255
        } else {
            0
        };
    }
    out
}

/// Canny edge detector: Sobel gradients, non-maximum suppression and
/// hysteresis between `low` and `high` (L1 gradient magnitude).
pub fn canny(gray: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let mut out = GrayImage::new(gray.width(), gray.height());
    if w < 3 || h < 3 {
        return out;
    }

    let plane: Vec<f32> = gray.as_raw().iter().map(|&v| f32::from(v)).collect();
    let (gx, gy) = sobel(&plane, w, h);
    let magnitude: Vec<f32> = gx
        .iter()
        .zip(gy.iter())
        .map(|(x, y)| x.abs() + y.abs())
        .collect();

    const TAN_22_5: f32 = 0.414_213_56;
    const TAN_67_5: f32 = 2.414_213_6;

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    let mut stack = Vec::new();

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let m = magnitude[i];
            if m <= low {
                continue;
            }

            let (ax, ay) = (gx[i].abs(), gy[i].abs());
            let (n1, n2) = if ay <= ax * TAN_22_5 {
                (i - 1, i + 1)
            } else if ay > ax * TAN_67_5 {
                (i - w, i + w)
            } else if gx[i] * gy[i] > 0.0 {
                (i - w - 1, i + w + 1)
            } else {
                (i - w + 1, i + w - 1)
            };

            if m > magnitude[n1] && m >= magnitude[n2] {
                if m > high {
                    class[i] = 2;
                    stack.push(i);
                } else {
                    class[i] = 1;
                }
            }
        }
    }

    while let Some(i) = stack.pop() {
        out.as_mut()[i] = 255;
        let (x, y) = (i % w, i / w);
        for dy in -1isize..=1 {
            for dx in -1isize..=1 {
                let nx = x as isize + dx;
                let ny = y as isize + dy;
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let j = ny as usize * w + nx as usize;
                if class[j] == 1 {
                    class[j] = 2;
                    stack.push(j);
                }
            }
        }
    }

    out
}

/// Morphological dilation with a `size` x `size` square element.
pub fn dilate(mask: &GrayImage, size: u32) -> GrayImage {
    if size <= 1 {
        return mask.clone();
    }
    let (w, h) = (mask.width() as isize, mask.height() as isize);
    let anchor = (size / 2) as isize;
    let reach = size as isize - 1 - anchor;

    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let (x, y) = (x as isize, y as isize);
        let mut best = 0u8;
        for dy in -anchor..=reach {
            for dx in -anchor..=reach {
                let (sx, sy) = (x + dx, y + dy);
                if sx >= 0 && sy >= 0 && sx < w && sy < h {
                    best = best.max(mask.get_pixel(sx as u32, sy as u32).0[0]);
                }
            }
        }
        Luma([best])
    })
}
