use rayon::prelude::*;
use rgbd_image::{Image, ImageError};

use super::Keypoint;
use crate::filter;

/// Parameters of the sub-pixel corner refinement.
#[derive(Debug, Clone, PartialEq)]
pub struct SubPixParams {
    /// Half side of the search window; the window spans `2 * half_window + 1` pixels.
    pub half_window: usize,
    /// Maximum number of iterations per corner.
    pub max_iterations: usize,
    /// Stop once the corner moves by less than this many pixels.
    pub epsilon: f32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 3,
            max_iterations: 20,
            epsilon: 0.01,
        }
    }
}

/// Move keypoints to the sub-pixel location of the corner they sit on.
///
/// The corner is the point `q` minimizing `sum w * (g^T (p - q))^2` over the
/// window pixels `p`, where `g` is the image gradient at `p` and `w` a Gaussian
/// weight. Every edge through a corner has its gradient orthogonal to `p - q`,
/// so the sum vanishes at the true corner. The window is re-centred on `q`
/// until it moves less than `epsilon`.
///
/// A keypoint is left untouched when the gradient structure in its window is
/// degenerate (flat or a single straight edge), when the window leaves the
/// image, or when the estimate drifts further than `half_window`.
///
/// # Arguments
///
/// * `image` - The grayscale image the keypoints were detected on.
/// * `keypoints` - Keypoints refined in place.
/// * `params` - Window and stopping criteria.
pub fn refine_corners(
    image: &Image<u8, 1>,
    keypoints: &mut [Keypoint],
    params: &SubPixParams,
) -> Result<(), ImageError> {
    if keypoints.is_empty() || params.half_window == 0 {
        return Ok(());
    }

    let mut dx = Image::from_size_val(image.size(), 0f32)?;
    let mut dy = Image::from_size_val(image.size(), 0f32)?;
    filter::spatial_gradient_float(image, &mut dx, &mut dy)?;

    let gradients = Gradients {
        dx: dx.as_slice(),
        dy: dy.as_slice(),
        cols: image.cols(),
        rows: image.rows(),
    };

    keypoints.par_iter_mut().for_each(|kp| {
        if let Some((x, y)) = gradients.refine(kp.x, kp.y, params) {
            kp.x = x;
            kp.y = y;
        }
    });

    Ok(())
}

struct Gradients<'a> {
    dx: &'a [f32],
    dy: &'a [f32],
    cols: usize,
    rows: usize,
}

impl Gradients<'_> {
    fn refine(&self, x0: f32, y0: f32, params: &SubPixParams) -> Option<(f32, f32)> {
        let half = params.half_window as isize;
        let sigma_sq = (params.half_window * params.half_window) as f64;
        let (mut cx, mut cy) = (x0 as f64, y0 as f64);

        for _ in 0..params.max_iterations {
            let (mut a, mut b, mut c, mut bx, mut by) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for j in -half..=half {
                for i in -half..=half {
                    let (px, py) = (cx + i as f64, cy + j as f64);
                    let (gx, gy) = self.sample(px, py)?;
                    let w = (-((i * i + j * j) as f64) / (2.0 * sigma_sq)).exp();
                    let (gxx, gxy, gyy) = (w * gx * gx, w * gx * gy, w * gy * gy);
                    a += gxx;
                    b += gxy;
                    c += gyy;
                    bx += gxx * px + gxy * py;
                    by += gxy * px + gyy * py;
                }
            }

            let det = a * c - b * b;
            if det <= 1e-6 * (a + c) * (a + c) {
                return None;
            }
            let qx = (c * bx - b * by) / det;
            let qy = (a * by - b * bx) / det;

            let step = ((qx - cx).powi(2) + (qy - cy).powi(2)).sqrt();
            (cx, cy) = (qx, qy);
            if step < params.epsilon as f64 {
                break;
            }
        }

        let shift = ((cx - x0 as f64).powi(2) + (cy - y0 as f64).powi(2)).sqrt();
        (shift <= params.half_window as f64).then_some((cx as f32, cy as f32))
    }

    /// Bilinear gradient at `(x, y)`, `None` outside the interior where Sobel saw no border.
    fn sample(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (xf, yf) = (x.floor(), y.floor());
        if xf < 1.0 || yf < 1.0 || xf + 2.0 >= self.cols as f64 || yf + 2.0 >= self.rows as f64 {
            return None;
        }
        let (x0, y0) = (xf as usize, yf as usize);
        let (fx, fy) = (x - xf, y - yf);
        let idx = y0 * self.cols + x0;
        let lerp = |g: &[f32]| {
            let top = g[idx] as f64 * (1.0 - fx) + g[idx + 1] as f64 * fx;
            let bottom = g[idx + self.cols] as f64 * (1.0 - fx) + g[idx + self.cols + 1] as f64 * fx;
            top * (1.0 - fy) + bottom * fy
        };
        Some((lerp(self.dx), lerp(self.dy)))
    }
}
