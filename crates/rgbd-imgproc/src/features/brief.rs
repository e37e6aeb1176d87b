use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use rgbd_image::Image;

use super::{
    intensity_centroid_angle, DescriptorExtractor, Descriptors, DistanceMetric, FeatureError,
    Keypoint, BINARY_DESCRIPTOR_BYTES, ORB_PATCH_RADIUS,
};
use crate::{filter, pyramid};

/// Seed of the default sampling pattern shared by BRIEF and ORB descriptors.
pub const DEFAULT_PATTERN_SEED: u64 = 0x5eed_b41e_f000_0100;

/// Largest coordinate of a test point relative to the keypoint.
const PATTERN_EXTENT: i32 = 13;

const SMOOTHING_KERNEL: usize = 5;

/// Pairs of points compared by a binary descriptor, as `[[x0, y0], [x1, y1]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BriefPattern {
    pairs: Vec<[[i8; 2]; 2]>,
}

impl BriefPattern {
    /// Draw a 256 test pattern uniformly inside the patch from a seeded generator.
    ///
    /// The same seed always gives the same pattern, so descriptors computed by
    /// two extractors built with the same seed are comparable.
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut coord = || rng.random_range(-PATTERN_EXTENT..=PATTERN_EXTENT) as i8;

        let n_tests = BINARY_DESCRIPTOR_BYTES * 8;
        let mut pairs = Vec::with_capacity(n_tests);
        while pairs.len() < n_tests {
            let p0 = [coord(), coord()];
            let p1 = [coord(), coord()];
            if p0 != p1 {
                pairs.push([p0, p1]);
            }
        }

        Self { pairs }
    }

    /// The point pairs of the pattern.
    pub fn pairs(&self) -> &[[[i8; 2]; 2]] {
        &self.pairs
    }
}

impl Default for BriefPattern {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN_SEED)
    }
}

/// Compute binary descriptors on the pyramid level each keypoint was detected on.
fn describe_binary(
    image: &Image<u8, 1>,
    keypoints: &[Keypoint],
    pattern: &BriefPattern,
    oriented: bool,
    scale_factor: f32,
) -> Result<(Vec<Keypoint>, Descriptors), FeatureError> {
    let n_levels = keypoints.iter().map(|kp| kp.octave).max().map_or(1, |o| o + 1);
    let levels = pyramid::build_pyramid(image, n_levels, scale_factor, 1)?;

    let smoothed = levels
        .iter()
        .map(|level| {
            let mut blurred = Image::from_size_val(level.size(), 0u8)?;
            filter::box_blur_u8(level, &mut blurred, SMOOTHING_KERNEL)?;
            Ok(blurred)
        })
        .collect::<Result<Vec<_>, FeatureError>>()?;

    // rotated test points stay within extent * sqrt(2)
    let margin = if oriented {
        (PATTERN_EXTENT as f32 * std::f32::consts::SQRT_2).ceil() as i32
    } else {
        PATTERN_EXTENT
    };

    let described: Vec<(Keypoint, [u8; BINARY_DESCRIPTOR_BYTES])> = keypoints
        .par_iter()
        .filter_map(|kp| {
            let level = levels.get(kp.octave)?;
            let blurred = &smoothed[kp.octave];
            let scale = scale_factor.powi(kp.octave as i32);
            let (cols, rows) = (level.cols() as i32, level.rows() as i32);
            let lx = (kp.x / scale).round() as i32;
            let ly = (kp.y / scale).round() as i32;
            if lx < margin || ly < margin || lx >= cols - margin || ly >= rows - margin {
                return None;
            }

            let angle = if oriented {
                Some(
                    kp.angle
                        .unwrap_or_else(|| intensity_centroid_angle(level, lx, ly, ORB_PATCH_RADIUS)),
                )
            } else {
                kp.angle
            };
            let (sin_a, cos_a) = if oriented {
                angle.unwrap_or(0.0).sin_cos()
            } else {
                (0.0, 1.0)
            };

            let data = blurred.as_slice();
            let sample = |p: [i8; 2]| -> u8 {
                let (px, py) = (p[0] as f32, p[1] as f32);
                let rx = (cos_a * px - sin_a * py).round() as i32;
                let ry = (sin_a * px + cos_a * py).round() as i32;
                data[((ly + ry) * cols + lx + rx) as usize]
            };

            let mut descriptor = [0u8; BINARY_DESCRIPTOR_BYTES];
            for (i, [p0, p1]) in pattern.pairs().iter().enumerate() {
                if sample(*p0) < sample(*p1) {
                    descriptor[i / 8] |= 1 << (i % 8);
                }
            }

            Some((Keypoint { angle, ..*kp }, descriptor))
        })
        .collect();

    let (kept, descriptors): (Vec<_>, Vec<_>) = described.into_iter().unzip();
    Ok((kept, Descriptors::Binary(descriptors)))
}

/// Binary Robust Independent Elementary Features, not rotation invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct BriefExtractor {
    /// The sampling pattern.
    pub pattern: BriefPattern,
    /// Pyramid scale factor used to locate keypoints with `octave > 0`.
    pub scale_factor: f32,
}

impl Default for BriefExtractor {
    fn default() -> Self {
        Self {
            pattern: BriefPattern::default(),
            scale_factor: 1.2,
        }
    }
}

impl DescriptorExtractor for BriefExtractor {
    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Hamming
    }

    fn describe(
        &self,
        image: &Image<u8, 1>,
        keypoints: &[Keypoint],
    ) -> Result<(Vec<Keypoint>, Descriptors), FeatureError> {
        describe_binary(image, keypoints, &self.pattern, false, self.scale_factor)
    }
}

/// Rotated BRIEF descriptor steered by the keypoint orientation.
///
/// Keypoints without an orientation get one from the intensity centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbExtractor {
    /// The sampling pattern.
    pub pattern: BriefPattern,
    /// Pyramid scale factor used to locate keypoints with `octave > 0`.
    pub scale_factor: f32,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self {
            pattern: BriefPattern::default(),
            scale_factor: 1.2,
        }
    }
}

impl DescriptorExtractor for OrbExtractor {
    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Hamming
    }

    fn describe(
        &self,
        image: &Image<u8, 1>,
        keypoints: &[Keypoint],
    ) -> Result<(Vec<Keypoint>, Descriptors), FeatureError> {
        describe_binary(image, keypoints, &self.pattern, true, self.scale_factor)
    }
}
