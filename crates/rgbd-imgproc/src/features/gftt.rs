use rgbd_image::{Image, ImageError};

use super::{filter_by_mask, FeatureDetector, FeatureError, Keypoint};
use crate::filter;

/// Corner measure computed from the windowed structure tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CornerMeasure {
    /// Smallest eigenvalue of the structure tensor (Shi-Tomasi).
    MinEigenValue,
    /// Harris response `det - k * trace^2`.
    Harris {
        /// Harris free parameter, typically 0.04.
        k: f32,
    },
}

/// Compute a corner response map over the whole image.
///
/// The structure tensor is built from Sobel derivatives summed over a
/// `block_size x block_size` window.
///
/// # Arguments
///
/// * `src` - The grayscale image.
/// * `block_size` - Odd side length of the summation window.
/// * `measure` - Which response to compute.
pub fn corner_response(
    src: &Image<u8, 1>,
    block_size: usize,
    measure: CornerMeasure,
) -> Result<Image<f32, 1>, ImageError> {
    let size = src.size();
    let mut dx = Image::from_size_val(size, 0f32)?;
    let mut dy = Image::from_size_val(size, 0f32)?;
    filter::spatial_gradient_float(src, &mut dx, &mut dy)?;

    let products = |f: fn(f32, f32) -> f32| -> Result<Image<f32, 1>, ImageError> {
        let data = dx
            .as_slice()
            .iter()
            .zip(dy.as_slice())
            .map(|(&gx, &gy)| f(gx, gy))
            .collect();
        Image::new(size, data)
    };
    let (ixx, ixy, iyy) = (
        products(|gx, _| gx * gx)?,
        products(|gx, gy| gx * gy)?,
        products(|_, gy| gy * gy)?,
    );

    let mut sxx = Image::from_size_val(size, 0f32)?;
    let mut sxy = Image::from_size_val(size, 0f32)?;
    let mut syy = Image::from_size_val(size, 0f32)?;
    filter::box_sum_f32(&ixx, &mut sxx, block_size)?;
    filter::box_sum_f32(&ixy, &mut sxy, block_size)?;
    filter::box_sum_f32(&iyy, &mut syy, block_size)?;

    let response = sxx
        .as_slice()
        .iter()
        .zip(sxy.as_slice())
        .zip(syy.as_slice())
        .map(|((&a, &b), &c)| match measure {
            CornerMeasure::MinEigenValue => {
                let half_trace = 0.5 * (a + c);
                let half_diff = 0.5 * (a - c);
                half_trace - (half_diff * half_diff + b * b).sqrt()
            }
            CornerMeasure::Harris { k } => {
                let det = a * c - b * b;
                let trace = a + c;
                det - k * trace * trace
            }
        })
        .collect();

    Image::new(size, response)
}

/// "Good features to track" corner detector.
#[derive(Debug, Clone, PartialEq)]
pub struct GfttDetector {
    /// Maximum number of corners to return.
    pub max_corners: usize,
    /// Minimal accepted quality, relative to the best corner response.
    pub quality_level: f32,
    /// Minimum Euclidean distance between returned corners.
    pub min_distance: f32,
    /// Side length of the structure tensor window.
    pub block_size: usize,
    /// Corner measure to rank pixels with.
    pub measure: CornerMeasure,
}

impl Default for GfttDetector {
    fn default() -> Self {
        Self {
            max_corners: 200,
            quality_level: 0.10,
            min_distance: 10.0,
            block_size: 3,
            measure: CornerMeasure::MinEigenValue,
        }
    }
}

impl FeatureDetector for GfttDetector {
    fn detect(
        &self,
        image: &Image<u8, 1>,
        mask: Option<&Image<u8, 1>>,
    ) -> Result<Vec<Keypoint>, FeatureError> {
        if !(self.quality_level > 0.0 && self.quality_level <= 1.0) {
            return Err(FeatureError::InvalidParameter(format!(
                "GFTT quality level must be in (0, 1], got {}",
                self.quality_level
            )));
        }

        let (cols, rows) = (image.cols(), image.rows());
        if cols < 3 || rows < 3 {
            return Ok(Vec::new());
        }
        if let Some(mask) = mask {
            image.ensure_same_size(mask)?;
        }

        let response = corner_response(image, self.block_size, self.measure)?;
        let resp = response.as_slice();

        let max_response = resp.iter().copied().fold(0f32, f32::max);
        if max_response <= 0.0 {
            return Ok(Vec::new());
        }
        let threshold = max_response * self.quality_level;

        // local maxima of the 3x3 neighbourhood above the quality threshold
        let mut candidates = Vec::new();
        for y in 1..rows - 1 {
            for x in 1..cols - 1 {
                let v = resp[y * cols + x];
                if v < threshold {
                    continue;
                }
                let is_peak = (y - 1..=y + 1)
                    .all(|ny| (x - 1..=x + 1).all(|nx| resp[ny * cols + nx] <= v));
                if is_peak {
                    candidates.push(Keypoint::new(
                        x as f32,
                        y as f32,
                        v,
                        self.block_size as f32,
                    ));
                }
            }
        }

        let mut candidates = filter_by_mask(candidates, mask, image)?;
        candidates.sort_by(|a, b| b.response.total_cmp(&a.response));

        let min_dist_sq = self.min_distance * self.min_distance;
        let mut corners: Vec<Keypoint> = Vec::with_capacity(self.max_corners);
        for kp in candidates {
            if corners.len() >= self.max_corners {
                break;
            }
            let far_enough = corners.iter().all(|c| {
                let (dx, dy) = (c.x - kp.x, c.y - kp.y);
                dx * dx + dy * dy >= min_dist_sq
            });
            if far_enough {
                corners.push(kp);
            }
        }

        Ok(corners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_image() -> Result<Image<u8, 1>, ImageError> {
        let mut img = Image::<u8, 1>::from_size_val([40, 40].into(), 10)?;
        for y in 12..28 {
            for x in 12..28 {
                img.set_pixel(x, y, 0, 230)?;
            }
        }
        Ok(img)
    }

    #[test]
    fn test_min_eigen_flat_and_edge() -> Result<(), ImageError> {
        let img = square_image()?;
        let response = corner_response(&img, 3, CornerMeasure::MinEigenValue)?;
        // flat region
        assert_eq!(response.get_pixel(3, 3, 0)?, 0.0);
        // the corner dominates the middle of an edge
        let corner = response.get_pixel(12, 12, 0)?;
        let edge = response.get_pixel(20, 12, 0)?;
        assert!(corner > edge);
        assert!(corner > 0.0);
        Ok(())
    }

    #[test]
    fn test_gftt_square_corners() -> Result<(), FeatureError> {
        let img = square_image()?;
        let detector = GfttDetector::default();
        let corners = detector.detect(&img, None)?;
        assert_eq!(corners.len(), 4);
        for kp in &corners {
            let near = |v: f32, a: f32, b: f32| (v - a).abs() <= 2.0 || (v - b).abs() <= 2.0;
            assert!(near(kp.x, 12.0, 27.0));
            assert!(near(kp.y, 12.0, 27.0));
        }
        Ok(())
    }

    #[test]
    fn test_gftt_limits() -> Result<(), FeatureError> {
        let img = square_image()?;
        let detector = GfttDetector {
            max_corners: 2,
            ..Default::default()
        };
        assert_eq!(detector.detect(&img, None)?.len(), 2);

        let mut mask = Image::<u8, 1>::from_size_val(img.size(), 0)?;
        for y in 0..20 {
            for x in 0..20 {
                mask.set_pixel(x, y, 0, 255)?;
            }
        }
        let masked = GfttDetector::default().detect(&img, Some(&mask))?;
        assert_eq!(masked.len(), 1);
        assert!(masked[0].x < 20.0 && masked[0].y < 20.0);

        let invalid = GfttDetector {
            quality_level: 0.0,
            ..Default::default()
        };
        assert!(invalid.detect(&img, None).is_err());
        Ok(())
    }

    #[test]
    fn test_gftt_flat() -> Result<(), FeatureError> {
        let img = Image::<u8, 1>::from_size_val([20, 20].into(), 50)?;
        assert!(GfttDetector::default().detect(&img, None)?.is_empty());
        Ok(())
    }
}
