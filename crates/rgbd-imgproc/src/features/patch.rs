use rayon::prelude::*;
use rgbd_image::Image;

use super::{DescriptorExtractor, Descriptors, DistanceMetric, FeatureError, Keypoint};
use crate::pyramid;

/// Normalized intensity patch descriptor.
///
/// The patch around each keypoint is split in a `grid x grid` array of cells.
/// The mean intensity of every cell forms the descriptor, which is then shifted
/// to zero mean and scaled to unit length. This makes it invariant to affine
/// brightness changes. Descriptors are compared with the Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchExtractor {
    /// Side length of the square patch in pixels.
    pub patch_size: usize,
    /// Number of cells per side.
    pub grid: usize,
    /// Pyramid scale factor used to locate keypoints with `octave > 0`.
    pub scale_factor: f32,
}

impl Default for PatchExtractor {
    fn default() -> Self {
        Self {
            patch_size: 16,
            grid: 8,
            scale_factor: 1.2,
        }
    }
}

impl PatchExtractor {
    /// Number of values per descriptor.
    pub fn dim(&self) -> usize {
        self.grid * self.grid
    }

    fn describe_one(&self, level: &Image<u8, 1>, lx: usize, ly: usize) -> Vec<f32> {
        let cols = level.cols();
        let cell = self.patch_size / self.grid;
        let x0 = lx - self.patch_size / 2;
        let y0 = ly - self.patch_size / 2;
        let data = level.as_slice();

        let mut values: Vec<f32> = (0..self.grid)
            .flat_map(|gy| (0..self.grid).map(move |gx| (gx, gy)))
            .map(|(gx, gy)| {
                let mut sum = 0u32;
                for y in y0 + gy * cell..y0 + (gy + 1) * cell {
                    for x in x0 + gx * cell..x0 + (gx + 1) * cell {
                        sum += data[y * cols + x] as u32;
                    }
                }
                sum as f32 / (cell * cell) as f32
            })
            .collect();

        let mean = values.iter().sum::<f32>() / values.len() as f32;
        values.iter_mut().for_each(|v| *v -= mean);
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }
}

impl DescriptorExtractor for PatchExtractor {
    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Euclidean
    }

    fn describe(
        &self,
        image: &Image<u8, 1>,
        keypoints: &[Keypoint],
    ) -> Result<(Vec<Keypoint>, Descriptors), FeatureError> {
        if self.grid == 0 || self.patch_size < self.grid || self.patch_size % self.grid != 0 {
            return Err(FeatureError::InvalidParameter(format!(
                "patch size {} must be a positive multiple of the grid {}",
                self.patch_size, self.grid
            )));
        }

        let n_levels = keypoints.iter().map(|kp| kp.octave).max().map_or(1, |o| o + 1);
        let levels = pyramid::build_pyramid(image, n_levels, self.scale_factor, 1)?;
        let half = (self.patch_size / 2) as i32;

        let described: Vec<(Keypoint, Vec<f32>)> = keypoints
            .par_iter()
            .filter_map(|kp| {
                let level = levels.get(kp.octave)?;
                let scale = self.scale_factor.powi(kp.octave as i32);
                let lx = (kp.x / scale).round() as i32;
                let ly = (kp.y / scale).round() as i32;
                let (cols, rows) = (level.cols() as i32, level.rows() as i32);
                if lx < half || ly < half || lx + half > cols || ly + half > rows {
                    return None;
                }
                Some((*kp, self.describe_one(level, lx as usize, ly as usize)))
            })
            .collect();

        let mut kept = Vec::with_capacity(described.len());
        let mut data = Vec::with_capacity(described.len() * self.dim());
        for (kp, values) in described {
            kept.push(kp);
            data.extend(values);
        }

        Ok((
            kept,
            Descriptors::Float {
                dim: self.dim(),
                data,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::euclidean_distance;
    use approx::assert_relative_eq;

    fn gradient_image(gain: u16, offset: u16) -> Image<u8, 1> {
        let data = (0..32u16)
            .flat_map(|y| (0..32u16).map(move |x| ((x + 2 * y) * gain / 4 + offset) as u8))
            .collect();
        Image::new([32, 32].into(), data).expect("valid size")
    }

    #[test]
    fn test_patch_unit_norm() -> Result<(), FeatureError> {
        let img = gradient_image(4, 0);
        let extractor = PatchExtractor::default();
        let (kept, descriptors) = extractor.describe(&img, &[Keypoint::new(16.0, 16.0, 1.0, 16.0)])?;
        assert_eq!(kept.len(), 1);
        let row = descriptors.float_row(0).expect("one descriptor");
        assert_eq!(row.len(), 64);
        assert_relative_eq!(row.iter().map(|v| v * v).sum::<f32>(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(row.iter().sum::<f32>(), 0.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn test_patch_brightness_invariance() -> Result<(), FeatureError> {
        let extractor = PatchExtractor::default();
        let kp = [Keypoint::new(16.0, 16.0, 1.0, 16.0)];
        let (_, a) = extractor.describe(&gradient_image(4, 0), &kp)?;
        let (_, b) = extractor.describe(&gradient_image(4, 40), &kp)?;
        let (a, b) = (
            a.float_row(0).expect("descriptor"),
            b.float_row(0).expect("descriptor"),
        );
        assert!(euclidean_distance(a, b) < 1e-4);
        Ok(())
    }

    #[test]
    fn test_patch_border() -> Result<(), FeatureError> {
        let img = gradient_image(4, 0);
        let extractor = PatchExtractor::default();
        let (kept, descriptors) = extractor.describe(
            &img,
            &[
                Keypoint::new(7.0, 16.0, 1.0, 16.0),
                Keypoint::new(8.0, 16.0, 1.0, 16.0),
                Keypoint::new(24.0, 24.0, 1.0, 16.0),
                Keypoint::new(25.0, 16.0, 1.0, 16.0),
            ],
        )?;
        assert_eq!(kept.len(), 2);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(extractor.metric(), DistanceMetric::Euclidean);
        Ok(())
    }
}
