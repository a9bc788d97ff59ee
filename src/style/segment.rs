//! Foreground segmentation for background replacement.
//!
//! A rectangle-seeded graph cut runs on a downscaled copy of the image:
//!
//! ```text
//! ┌────────────────────────────┐
//! │ definite background        │   pixels outside the 10% margin rectangle
//! │   ┌────────────────────┐   │   are tied to the sink with infinite cost
//! │   │  unknown           │   │
//! │   │  (fg/bg by cut)    │   │   unknown pixels get t-links from the
//! │   │                    │   │   negative log-likelihood of two color
//! │   └────────────────────┘   │   models, n-links from color contrast
//! └────────────────────────────┘
//! ```
//!
//! Color models are re-estimated from the current labeling for a fixed
//! number of iterations. When the cut degenerates (no foreground at all) the
//! caller falls back to a soft centered ellipse.

use std::collections::VecDeque;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use tracing::{debug, warn};

use super::filters::{gaussian_blur, odd_at_least};
use super::quantize::{Palette, StyleRng};
use super::raster::fit_dimensions;
use crate::error::StyleError;

/// Longest side of the copy the graph is built on.
const WORK_EDGE: u32 = 80;

/// Re-estimation rounds.
const ITERATIONS: usize = 3;

/// Mixture components per color model.
const COMPONENTS: usize = 5;

/// Smoothness weight of the pairwise term.
const GAMMA: f64 = 50.0;

/// Capacity standing in for "never cut".
const HARD: f64 = 1e9;

/// Fixed seed so segmentation is reproducible for a given image.
const SEED: u64 = 0x5EC_0A11;

// =============================================================================
// Public Entry Points
// =============================================================================

/// Soft foreground mask (0 = background, 255 = foreground) at the size of
/// `img`, or [`StyleError::SegmentationFailed`].
pub fn foreground_mask(img: &RgbImage) -> Result<GrayImage, StyleError> {
    let (w, h) = img.dimensions();
    let (sw, sh) = fit_dimensions(w, h, WORK_EDGE, WORK_EDGE);
    if sw < 5 || sh < 5 {
        return Err(StyleError::SegmentationFailed {
            reason: format!("image too small to segment ({}x{})", w, h),
        });
    }

    let small = if (sw, sh) == (w, h) {
        img.clone()
    } else {
        imageops::resize(img, sw, sh, FilterType::Triangle)
    };

    let labels = graph_cut(&small)?;
    let hard = GrayImage::from_fn(sw, sh, |x, y| {
        Luma([if labels[(y * sw + x) as usize] { 255 } else { 0 }])
    });

    let full = if (sw, sh) == (w, h) {
        hard
    } else {
        imageops::resize(&hard, w, h, FilterType::Triangle)
    };
    Ok(gaussian_blur(&full, 7))
}

/// Blurred centered ellipse with semi-axes at 40% of each dimension.
pub fn fallback_mask(width: u32, height: u32) -> GrayImage {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let (ax, ay) = ((width as f32 * 0.4).max(1.0), (height as f32 * 0.4).max(1.0));

    let ellipse = GrayImage::from_fn(width, height, |x, y| {
        let dx = (x as f32 + 0.5 - cx) / ax;
        let dy = (y as f32 + 0.5 - cy) / ay;
        Luma([if dx * dx + dy * dy <= 1.0 { 255 } else { 0 }])
    });

    let ksize = odd_at_least((width.min(height) / 4) as f32, 3).min(51);
    gaussian_blur(&ellipse, ksize)
}

/// Graph-cut mask, or the ellipse fallback when segmentation fails.
pub fn mask_or_fallback(img: &RgbImage) -> GrayImage {
    match foreground_mask(img) {
        Ok(mask) => mask,
        Err(e) => {
            warn!(error = %e, "Segmentation failed, using centered fallback mask");
            fallback_mask(img.width(), img.height())
        }
    }
}

// =============================================================================
// Color Models
// =============================================================================

/// Isotropic Gaussian component.
#[derive(Debug, Clone, Copy)]
struct Component {
    mean: [f32; 3],
    variance: f64,
    weight: f64,
}

/// Mixture of isotropic Gaussians fitted by k-means.
struct ColorModel {
    components: Vec<Component>,
}

impl ColorModel {
    fn fit(samples: &[[f32; 3]], rng: &mut StyleRng) -> Self {
        let palette = Palette::fit_samples(samples, COMPONENTS, rng);
        let k = palette.centers().len();

        let mut counts = vec![0usize; k];
        let mut spread = vec![0f64; k];
        for px in samples {
            let i = palette.nearest(px);
            counts[i] += 1;
            let c = palette.centers()[i];
            spread[i] += (0..3)
                .map(|ch| f64::from(px[ch] - c[ch]).powi(2))
                .sum::<f64>();
        }

        let total = samples.len().max(1) as f64;
        let components = palette
            .centers()
            .iter()
            .enumerate()
            .filter(|(i, _)| counts[*i] > 0)
            .map(|(i, &mean)| Component {
                mean,
                // Regularized so flat regions do not produce zero variance
                variance: spread[i] / (3.0 * counts[i] as f64) + 10.0,
                weight: counts[i] as f64 / total,
            })
            .collect();

        Self { components }
    }

    /// Negative log-likelihood of a color under the mixture.
    fn cost(&self, px: &[f32; 3]) -> f64 {
        let density: f64 = self
            .components
            .iter()
            .map(|c| {
                let d2: f64 = (0..3).map(|ch| f64::from(px[ch] - c.mean[ch]).powi(2)).sum();
                let norm = (2.0 * std::f64::consts::PI * c.variance).powf(-1.5);
                c.weight * norm * (-d2 / (2.0 * c.variance)).exp()
            })
            .sum();
        -(density.max(1e-300)).ln()
    }
}

// =============================================================================
// Graph Cut
// =============================================================================

fn graph_cut(img: &RgbImage) -> Result<Vec<bool>, StyleError> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let n = w * h;
    let pixels: Vec<[f32; 3]> = img.pixels().map(|p| p.0.map(f32::from)).collect();

    let (x0, y0) = (w / 10, h / 10);
    let (x1, y1) = (x0 + w * 8 / 10, y0 + h * 8 / 10);
    let unknown: Vec<bool> = (0..n)
        .map(|i| {
            let (x, y) = (i % w, i / w);
            x >= x0 && x < x1 && y >= y0 && y < y1
        })
        .collect();

    let unknown_count = unknown.iter().filter(|&&u| u).count();
    if unknown_count == 0 || unknown_count == n {
        return Err(StyleError::SegmentationFailed {
            reason: "seed rectangle does not split the image".to_string(),
        });
    }

    let pairs = neighbour_pairs(w, h);
    let beta = contrast_beta(&pixels, &pairs);
    let pair_weights: Vec<f64> = pairs
        .iter()
        .map(|&(a, b)| GAMMA * (-beta * color_distance_sq(&pixels[a], &pixels[b])).exp())
        .collect();

    let mut rng = StyleRng::seeded(SEED);
    let mut foreground = unknown.clone();

    for round in 0..ITERATIONS {
        let fg_samples: Vec<[f32; 3]> = select(&pixels, &foreground, true);
        let bg_samples: Vec<[f32; 3]> = select(&pixels, &foreground, false);
        if fg_samples.is_empty() {
            break;
        }

        let fg_model = ColorModel::fit(&fg_samples, &mut rng);
        let bg_model = ColorModel::fit(&bg_samples, &mut rng);

        let source = n;
        let sink = n + 1;
        let mut graph = FlowGraph::new(n + 2);
        for i in 0..n {
            if unknown[i] {
                // Labelling a pixel foreground cuts its sink link and vice versa
                graph.add_edge(source, i, bg_model.cost(&pixels[i]), 0.0);
                graph.add_edge(i, sink, fg_model.cost(&pixels[i]), 0.0);
            } else {
                graph.add_edge(i, sink, HARD, 0.0);
            }
        }
        for (&(a, b), &wgt) in pairs.iter().zip(pair_weights.iter()) {
            graph.add_edge(a, b, wgt, wgt);
        }

        let flow = graph.max_flow(source, sink);
        let reachable = graph.source_side(source);
        foreground = (0..n).map(|i| unknown[i] && reachable[i]).collect();

        debug!(
            round,
            flow,
            foreground = foreground.iter().filter(|&&f| f).count(),
            "Graph cut round"
        );
    }

    let fg_count = foreground.iter().filter(|&&f| f).count();
    if fg_count * 100 < unknown_count {
        return Err(StyleError::SegmentationFailed {
            reason: format!(
                "degenerate cut ({} of {} candidate pixels in foreground)",
                fg_count, unknown_count
            ),
        });
    }
    Ok(foreground)
}

fn select(pixels: &[[f32; 3]], labels: &[bool], want: bool) -> Vec<[f32; 3]> {
    pixels
        .iter()
        .zip(labels.iter())
        .filter(|(_, &l)| l == want)
        .map(|(p, _)| *p)
        .collect()
}

fn neighbour_pairs(w: usize, h: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(2 * w * h);
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            if x + 1 < w {
                pairs.push((i, i + 1));
            }
            if y + 1 < h {
                pairs.push((i, i + w));
            }
        }
    }
    pairs
}

#[inline]
fn color_distance_sq(a: &[f32; 3], b: &[f32; 3]) -> f64 {
    (0..3).map(|c| f64::from(a[c] - b[c]).powi(2)).sum()
}

/// `1 / (2 * E[|zm - zn|^2])` over neighbouring pairs.
fn contrast_beta(pixels: &[[f32; 3]], pairs: &[(usize, usize)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let mean = pairs
        .iter()
        .map(|&(a, b)| color_distance_sq(&pixels[a], &pixels[b]))
        .sum::<f64>()
        / pairs.len() as f64;
    if mean <= f64::EPSILON {
        0.0
    } else {
        1.0 / (2.0 * mean)
    }
}

// =============================================================================
// Max-Flow (Dinic)
// =============================================================================

const FLOW_EPS: f64 = 1e-9;

struct Edge {
    to: usize,
    cap: f64,
}

/// Residual graph; edge `e` and `e ^ 1` are each other's reverse.
struct FlowGraph {
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
    level: Vec<i32>,
    cursor: Vec<usize>,
}

impl FlowGraph {
    fn new(nodes: usize) -> Self {
        Self {
            edges: Vec::new(),
            adjacency: vec![Vec::new(); nodes],
            level: vec![-1; nodes],
            cursor: vec![0; nodes],
        }
    }

    fn add_edge(&mut self, from: usize, to: usize, cap: f64, reverse_cap: f64) {
        self.adjacency[from].push(self.edges.len());
        self.edges.push(Edge { to, cap });
        self.adjacency[to].push(self.edges.len());
        self.edges.push(Edge {
            to: from,
            cap: reverse_cap,
        });
    }

    fn max_flow(&mut self, source: usize, sink: usize) -> f64 {
        let mut total = 0.0;
        while self.build_levels(source, sink) {
            self.cursor.iter_mut().for_each(|c| *c = 0);
            total += self.blocking_flow(source, sink);
        }
        total
    }

    fn build_levels(&mut self, source: usize, sink: usize) -> bool {
        self.level.iter_mut().for_each(|l| *l = -1);
        self.level[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            for &e in &self.adjacency[u] {
                let v = self.edges[e].to;
                if self.level[v] < 0 && self.edges[e].cap > FLOW_EPS {
                    self.level[v] = self.level[u] + 1;
                    queue.push_back(v);
                }
            }
        }
        self.level[sink] >= 0
    }

    /// Saturate every shortest augmenting path in the level graph.
    fn blocking_flow(&mut self, source: usize, sink: usize) -> f64 {
        let mut total = 0.0;
        let mut path: Vec<usize> = Vec::new();
        let mut u = source;

        loop {
            if u == sink {
                let pushed = path
                    .iter()
                    .map(|&e| self.edges[e].cap)
                    .fold(f64::INFINITY, f64::min);
                for &e in &path {
                    self.edges[e].cap -= pushed;
                    self.edges[e ^ 1].cap += pushed;
                }
                total += pushed;
                path.clear();
                u = source;
                continue;
            }

            let mut advanced = false;
            while self.cursor[u] < self.adjacency[u].len() {
                let e = self.adjacency[u][self.cursor[u]];
                let v = self.edges[e].to;
                if self.edges[e].cap > FLOW_EPS && self.level[v] == self.level[u] + 1 {
                    path.push(e);
                    u = v;
                    advanced = true;
                    break;
                }
                self.cursor[u] += 1;
            }

            if !advanced {
                // Dead end: drop the node from this phase and back up
                self.level[u] = -1;
                match path.pop() {
                    Some(e) => {
                        u = self.edges[e ^ 1].to;
                        self.cursor[u] += 1;
                    }
                    None => return total,
                }
            }
        }
    }

    /// Nodes reachable from `source` in the residual graph.
    fn source_side(&self, source: usize) -> Vec<bool> {
        let mut seen = vec![false; self.adjacency.len()];
        seen[source] = true;
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            for &e in &self.adjacency[u] {
                let v = self.edges[e].to;
                if !seen[v] && self.edges[e].cap > FLOW_EPS {
                    seen[v] = true;
                    queue.push_back(v);
                }
            }
        }
        seen
    }
}
