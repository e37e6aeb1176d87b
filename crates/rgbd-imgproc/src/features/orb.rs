use rgbd_image::Image;

use super::{
    corner_response, fast_feature_detector, filter_by_mask, retain_best, CornerMeasure,
    FeatureDetector, FeatureError, Keypoint,
};
use crate::pyramid;

/// Radius of the patch used for orientation and description.
pub const ORB_PATCH_RADIUS: i32 = 15;

const HARRIS_BLOCK_SIZE: usize = 7;

/// Orientation of a patch by the intensity centroid method.
///
/// Returns `atan2(m01, m10)` where the moments are taken over the disc of the
/// given radius centred on `(x, y)`. Pixels outside the image are ignored.
pub fn intensity_centroid_angle(image: &Image<u8, 1>, x: i32, y: i32, radius: i32) -> f32 {
    let (cols, rows) = (image.cols() as i32, image.rows() as i32);
    let data = image.as_slice();
    let r2 = radius * radius;

    let (mut m10, mut m01) = (0i64, 0i64);
    for dy in -radius..=radius {
        let yy = y + dy;
        if yy < 0 || yy >= rows {
            continue;
        }
        for dx in -radius..=radius {
            let xx = x + dx;
            if dx * dx + dy * dy > r2 || xx < 0 || xx >= cols {
                continue;
            }
            let v = data[(yy * cols + xx) as usize] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }

    (m01 as f32).atan2(m10 as f32)
}

/// Oriented FAST keypoint detector over an image pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbDetector {
    /// Maximum number of keypoints over all levels.
    pub n_features: usize,
    /// Ratio between two consecutive pyramid levels.
    pub scale_factor: f32,
    /// Number of pyramid levels.
    pub n_levels: usize,
    /// FAST threshold used to find candidates.
    pub fast_threshold: u8,
    /// Keypoints closer than this to the border of their level are dropped.
    pub edge_threshold: usize,
    /// Harris free parameter used for ranking.
    pub harris_k: f32,
}

impl Default for OrbDetector {
    fn default() -> Self {
        Self {
            n_features: 500,
            scale_factor: 1.2,
            n_levels: 3,
            fast_threshold: 20,
            edge_threshold: 31,
            harris_k: 0.04,
        }
    }
}

impl OrbDetector {
    /// Number of features requested from each pyramid level.
    ///
    /// The budget decreases geometrically with the level area and sums to `n_features`.
    pub fn features_per_level(&self, n_levels: usize) -> Vec<usize> {
        if n_levels == 0 {
            return Vec::new();
        }
        let factor = 1.0 / self.scale_factor as f64;
        let mut desired = if (factor - 1.0).abs() < f64::EPSILON {
            self.n_features as f64 / n_levels as f64
        } else {
            self.n_features as f64 * (1.0 - factor) / (1.0 - factor.powi(n_levels as i32))
        };

        let mut per_level = Vec::with_capacity(n_levels);
        let mut sum = 0usize;
        for _ in 0..n_levels - 1 {
            let n = desired.round() as usize;
            per_level.push(n);
            sum += n;
            desired *= factor;
        }
        per_level.push(self.n_features.saturating_sub(sum));
        per_level
    }

    fn validate(&self) -> Result<(), FeatureError> {
        if self.scale_factor.is_nan() || self.scale_factor < 1.0 || self.n_levels == 0 {
            return Err(FeatureError::InvalidParameter(format!(
                "ORB needs scale factor >= 1 and at least one level, got {} and {}",
                self.scale_factor, self.n_levels
            )));
        }
        Ok(())
    }
}

impl FeatureDetector for OrbDetector {
    fn detect(
        &self,
        image: &Image<u8, 1>,
        mask: Option<&Image<u8, 1>>,
    ) -> Result<Vec<Keypoint>, FeatureError> {
        self.validate()?;
        if let Some(mask) = mask {
            image.ensure_same_size(mask)?;
        }

        let min_side = 2 * self.edge_threshold + 1;
        if image.width() < min_side || image.height() < min_side {
            return Ok(Vec::new());
        }

        let levels = pyramid::build_pyramid(image, self.n_levels, self.scale_factor, min_side)?;
        let budget = self.features_per_level(levels.len());

        let mut keypoints = Vec::new();
        for (octave, (level, &n_desired)) in levels.iter().zip(budget.iter()).enumerate() {
            let scale = self.scale_factor.powi(octave as i32);
            let (cols, rows) = (level.cols(), level.rows());
            let border = self.edge_threshold;

            let corners = fast_feature_detector(level, self.fast_threshold, 9, true)?;
            if corners.is_empty() {
                continue;
            }
            let harris = corner_response(
                level,
                HARRIS_BLOCK_SIZE,
                CornerMeasure::Harris { k: self.harris_k },
            )?;

            let candidates = corners
                .into_iter()
                .filter(|c| c.x >= border && c.x < cols - border)
                .filter(|c| c.y >= border && c.y < rows - border)
                .map(|c| Keypoint {
                    x: c.x as f32 * scale,
                    y: c.y as f32 * scale,
                    response: harris.as_slice()[c.y * cols + c.x],
                    size: (2 * ORB_PATCH_RADIUS + 1) as f32 * scale,
                    angle: Some(intensity_centroid_angle(
                        level,
                        c.x as i32,
                        c.y as i32,
                        ORB_PATCH_RADIUS,
                    )),
                    octave,
                })
                .collect();

            let mut level_keypoints = filter_by_mask(candidates, mask, image)?;
            log::debug!(
                "ORB level {octave} ({cols}x{rows}): {} candidates, budget {n_desired}",
                level_keypoints.len()
            );
            retain_best(&mut level_keypoints, n_desired);
            keypoints.extend(level_keypoints);
        }

        Ok(keypoints)
    }
}
