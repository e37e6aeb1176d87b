use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rayon::prelude::*;
use rgbd_image::Image;

use super::{filter_by_mask, FeatureDetector, FeatureError, Keypoint};

/// A FAST corner with its segment-test score.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FastCorner {
    /// Column of the corner.
    pub x: usize,
    /// Row of the corner.
    pub y: usize,
    /// Sum of absolute differences beyond the threshold, the larger the stronger.
    pub score: i32,
}

impl Ord for FastCorner {
    fn cmp(&self, other: &Self) -> Ordering {
        // strongest first, then the earliest in raster order
        (self.score, Reverse(self.y), Reverse(self.x)).cmp(&(
            other.score,
            Reverse(other.y),
            Reverse(other.x),
        ))
    }
}

impl PartialOrd for FastCorner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Offsets of the 16 pixel Bresenham circle of radius 3, clockwise from the top.
fn circle_offsets(cols: isize) -> [isize; 16] {
    [
        -3 * cols,
        -3 * cols + 1,
        -2 * cols + 2,
        -cols + 3,
        3,
        cols + 3,
        2 * cols + 2,
        3 * cols + 1,
        3 * cols,
        3 * cols - 1,
        2 * cols - 2,
        cols - 3,
        -3,
        -cols - 3,
        -2 * cols - 2,
        -3 * cols - 1,
    ]
}

/// Segment test on one pixel; returns the corner score when it passes.
#[inline]
fn corner_score(
    data: &[u8],
    idx: usize,
    offsets: &[isize; 16],
    threshold: u8,
    arc_length: u8,
) -> Option<i32> {
    let center = data[idx];
    let lower = center.saturating_sub(threshold);
    let upper = center.saturating_add(threshold);

    let ring: [u8; 16] = std::array::from_fn(|i| data[(idx as isize + offsets[i]) as usize]);

    // a contiguous arc of n pixels covers at least n / 4 of the compass points
    let min_cardinal = (arc_length / 4) as usize;
    let cardinals = [ring[0], ring[4], ring[8], ring[12]];
    let n_bright = cardinals.iter().filter(|&&p| p > upper).count();
    let n_dark = cardinals.iter().filter(|&&p| p < lower).count();
    if n_bright < min_cardinal && n_dark < min_cardinal {
        return None;
    }

    let mut bright = 0u16;
    let mut dark = 0u16;
    for (i, &p) in ring.iter().enumerate() {
        if p > upper {
            bright |= 1 << i;
        } else if p < lower {
            dark |= 1 << i;
        }
    }

    let window = if arc_length >= 16 {
        u16::MAX
    } else {
        (1u16 << arc_length) - 1
    };
    let is_corner = (0..16).any(|shift| {
        let w = window.rotate_left(shift);
        bright & w == w || dark & w == w
    });
    if !is_corner {
        return None;
    }

    let (mut score_bright, mut score_dark) = (0i32, 0i32);
    for &p in ring.iter() {
        if p > upper {
            score_bright += (p - upper) as i32;
        } else if p < lower {
            score_dark += (lower - p) as i32;
        }
    }

    Some(score_bright.max(score_dark))
}

/// Fast feature detector with optional non-maximum suppression.
///
/// # Arguments
///
/// * `src` - The source image as Gray8 image.
/// * `threshold` - The intensity difference to the center pixel for a circle pixel to count.
/// * `arc_length` - The number of consecutive circle pixels that must be all brighter or all darker.
/// * `nms` - Keep only the strongest corner within each 3x3 neighbourhood.
///
/// # Returns
///
/// The detected corners in raster order, or by decreasing score when `nms` is set.
pub fn fast_feature_detector(
    src: &Image<u8, 1>,
    threshold: u8,
    arc_length: u8,
    nms: bool,
) -> Result<Vec<FastCorner>, FeatureError> {
    if arc_length == 0 || arc_length > 16 {
        return Err(FeatureError::InvalidParameter(format!(
            "FAST arc length must be in 1..=16, got {arc_length}"
        )));
    }

    let (cols, rows) = (src.cols(), src.rows());
    if cols < 7 || rows < 7 {
        return Ok(Vec::new());
    }

    let offsets = circle_offsets(cols as isize);
    let data = src.as_slice();

    let corners: Vec<FastCorner> = (3..rows - 3)
        .into_par_iter()
        .flat_map_iter(|y| {
            (3..cols - 3).filter_map(move |x| {
                corner_score(data, y * cols + x, &offsets, threshold, arc_length)
                    .map(|score| FastCorner { x, y, score })
            })
        })
        .collect();

    if !nms {
        return Ok(corners);
    }

    let mut heap = BinaryHeap::from(corners);
    let mut suppressed = vec![false; rows * cols];
    let mut kept = Vec::new();

    while let Some(corner) = heap.pop() {
        if suppressed[corner.y * cols + corner.x] {
            continue;
        }
        kept.push(corner);

        for ny in corner.y - 1..=corner.y + 1 {
            for nx in corner.x - 1..=corner.x + 1 {
                suppressed[ny * cols + nx] = true;
            }
        }
    }

    Ok(kept)
}

/// FAST corner detector.
#[derive(Debug, Clone, PartialEq)]
pub struct FastDetector {
    /// Intensity threshold of the segment test.
    pub threshold: u8,
    /// Required number of contiguous circle pixels.
    pub arc_length: u8,
    /// Whether to apply non-maximum suppression.
    pub nms: bool,
    /// Keep only the strongest corners when set.
    pub max_features: Option<usize>,
}

impl Default for FastDetector {
    fn default() -> Self {
        Self {
            threshold: 10,
            arc_length: 9,
            nms: true,
            max_features: None,
        }
    }
}

impl FeatureDetector for FastDetector {
    fn detect(
        &self,
        image: &Image<u8, 1>,
        mask: Option<&Image<u8, 1>>,
    ) -> Result<Vec<Keypoint>, FeatureError> {
        let corners = fast_feature_detector(image, self.threshold, self.arc_length, self.nms)?;

        let keypoints = corners
            .into_iter()
            .map(|c| Keypoint::new(c.x as f32, c.y as f32, c.score as f32, 7.0))
            .collect();
        let mut keypoints = filter_by_mask(keypoints, mask, image)?;

        if let Some(n) = self.max_features {
            super::retain_best(&mut keypoints, n);
        }

        Ok(keypoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_feature_detector() -> Result<(), FeatureError> {
        #[rustfmt::skip]
        let img = Image::new(
            [7, 7].into(),
            vec![
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50, 200,  50,  50,  50,
                50,  50, 200, 200, 200,  50,  50,
                50,  50,  50, 200,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
            ],
        )?;
        let corners = fast_feature_detector(&img, 100, 9, false)?;
        assert_eq!(
            corners,
            vec![FastCorner {
                x: 3,
                y: 3,
                score: 16 * 50
            }]
        );
        Ok(())
    }

    #[test]
    fn test_fast_wrapping_arc() -> Result<(), FeatureError> {
        // the dark arc crosses the start of the circle
        #[rustfmt::skip]
        let img = Image::new(
            [7, 7].into(),
            vec![
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50,  50,  50,  50,  50,
                50,  50,  50, 200,  50,  50,  50,
               200, 200, 200, 200, 200, 200, 200,
               200, 200, 200, 200, 200, 200, 200,
               200, 200, 200, 200, 200, 200, 200,
            ],
        )?;
        let corners = fast_feature_detector(&img, 100, 9, true)?;
        assert_eq!(corners.len(), 1);
        assert_eq!((corners[0].x, corners[0].y), (3, 3));
        Ok(())
    }

    #[test]
    fn test_fast_nms_square() -> Result<(), FeatureError> {
        let mut img = Image::<u8, 1>::from_size_val([32, 32].into(), 20)?;
        for y in 10..22 {
            for x in 10..22 {
                img.set_pixel(x, y, 0, 220)?;
            }
        }

        let raw = fast_feature_detector(&img, 40, 9, false)?;
        let suppressed = fast_feature_detector(&img, 40, 9, true)?;
        assert!(!suppressed.is_empty());
        assert!(suppressed.len() <= raw.len());
        for w in suppressed.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
        for (i, a) in suppressed.iter().enumerate() {
            for b in suppressed.iter().skip(i + 1) {
                assert!(a.x.abs_diff(b.x) > 1 || a.y.abs_diff(b.y) > 1);
            }
        }
        Ok(())
    }

    #[test]
    fn test_fast_flat_image() -> Result<(), FeatureError> {
        let img = Image::<u8, 1>::from_size_val([16, 16].into(), 128)?;
        assert!(fast_feature_detector(&img, 10, 9, true)?.is_empty());
        assert!(fast_feature_detector(&img, 10, 17, true).is_err());
        Ok(())
    }

    #[test]
    fn test_fast_detector_mask() -> Result<(), FeatureError> {
        let mut img = Image::<u8, 1>::from_size_val([32, 32].into(), 20)?;
        for y in 10..22 {
            for x in 10..22 {
                img.set_pixel(x, y, 0, 220)?;
            }
        }
        let detector = FastDetector {
            threshold: 40,
            ..Default::default()
        };
        let all = detector.detect(&img, None)?;
        assert!(!all.is_empty());

        let empty_mask = Image::<u8, 1>::from_size_val(img.size(), 0)?;
        assert!(detector.detect(&img, Some(&empty_mask))?.is_empty());

        let limited = FastDetector {
            threshold: 40,
            max_features: Some(2),
            ..Default::default()
        };
        assert_eq!(limited.detect(&img, None)?.len(), 2.min(all.len()));
        Ok(())
    }
}
