//! Profiling and visualization hooks.
//!
//! Diagnostics are observational: a [`DiagnosticsSink`] receives stage
//! timings and overlay images while the estimator runs, but nothing it does
//! can change the estimated pose or the inlier count.

use std::fmt;
use std::time::Duration;

use rgbd_image::{ColorImage, GrayImage, ImageError};
use rgbd_imgproc::color::rgb_from_gray_u8;
use rgbd_imgproc::draw::{draw_circle, draw_line, hconcat};
use rgbd_imgproc::features::Keypoint;

use crate::correspondence::Correspondence;

/// A timed step of the estimation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Keypoint detection on both images.
    Detection,
    /// Descriptor extraction on both images.
    Description,
    /// Descriptor matching and depth lookup.
    Matching,
    /// Robust PnP solve.
    Solving,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Detection => "detection",
            Stage::Description => "description",
            Stage::Matching => "matching",
            Stage::Solving => "solving",
        };
        f.write_str(name)
    }
}

/// Wall-clock duration of each pipeline stage.
///
/// Stages that did not run, e.g. after an early degenerate exit, stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    /// Time spent detecting keypoints.
    pub detection: Duration,
    /// Time spent computing descriptors.
    pub description: Duration,
    /// Time spent matching and building correspondences.
    pub matching: Duration,
    /// Time spent in RANSAC.
    pub solving: Duration,
}

impl StageTimings {
    /// The duration of `stage`.
    pub fn get(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Detection => self.detection,
            Stage::Description => self.description,
            Stage::Matching => self.matching,
            Stage::Solving => self.solving,
        }
    }

    /// Add `elapsed` to the duration of `stage`.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        let slot = match stage {
            Stage::Detection => &mut self.detection,
            Stage::Description => &mut self.description,
            Stage::Matching => &mut self.matching,
            Stage::Solving => &mut self.solving,
        };
        *slot += elapsed;
    }

    /// Sum of all stage durations.
    pub fn total(&self) -> Duration {
        self.detection + self.description + self.matching + self.solving
    }
}

/// An image rendered for inspection when `draw_matches` is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlay {
    /// Reference grayscale image with its keypoints.
    ReferenceKeypoints,
    /// Query grayscale image with its keypoints.
    QueryKeypoints,
    /// Mask of the reference pixels with a depth measurement.
    DepthMask,
    /// Query and reference side by side, joined by the candidate correspondences.
    CandidateMatches,
    /// Query and reference side by side, joined by the inlier correspondences.
    InlierMatches,
}

/// Receiver of diagnostics from [`PoseEstimator::estimate`](crate::PoseEstimator::estimate).
///
/// Both methods default to doing nothing.
pub trait DiagnosticsSink {
    /// Called after each stage when profiling is enabled.
    fn on_stage_timing(&mut self, _stage: Stage, _elapsed: Duration) {}

    /// Called with each overlay image when drawing is enabled.
    fn on_overlay(&mut self, _overlay: Overlay, _image: &ColorImage) {}
}

/// A sink keeping everything it receives, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    /// Received stage timings.
    pub timings: Vec<(Stage, Duration)>,
    /// Received overlay images.
    pub overlays: Vec<(Overlay, ColorImage)>,
}

impl RecordingSink {
    /// The first received overlay of the given kind.
    pub fn overlay(&self, kind: Overlay) -> Option<&ColorImage> {
        self.overlays
            .iter()
            .find_map(|(k, img)| (*k == kind).then_some(img))
    }
}

impl DiagnosticsSink for RecordingSink {
    fn on_stage_timing(&mut self, stage: Stage, elapsed: Duration) {
        self.timings.push((stage, elapsed));
    }

    fn on_overlay(&mut self, overlay: Overlay, image: &ColorImage) {
        self.overlays.push((overlay, image.clone()));
    }
}

const KEYPOINT_COLOR: [u8; 3] = [0, 255, 0];
const KEYPOINT_RADIUS: i64 = 3;

fn to_rgb(gray: &GrayImage) -> Result<ColorImage, ImageError> {
    let mut rgb = ColorImage::from_size_val(gray.size(), 0)?;
    rgb_from_gray_u8(gray, &mut rgb)?;
    Ok(rgb)
}

fn pixel(x: f64, y: f64) -> (i64, i64) {
    (x.round() as i64, y.round() as i64)
}

/// Replicate a single channel image, such as the depth mask, into RGB.
pub fn render_mask(mask: &GrayImage) -> Result<ColorImage, ImageError> {
    to_rgb(mask)
}

/// Draw keypoints as small circles over a grayscale image.
pub fn render_keypoints(image: &GrayImage, keypoints: &[Keypoint]) -> Result<ColorImage, ImageError> {
    let mut canvas = to_rgb(image)?;
    for kp in keypoints {
        draw_circle(
            &mut canvas,
            pixel(kp.x as f64, kp.y as f64),
            KEYPOINT_RADIUS,
            KEYPOINT_COLOR,
        );
    }
    Ok(canvas)
}

/// Draw correspondences between the query image (left) and the reference image (right).
///
/// Every correspondence gets a line from its query pixel to its reference
/// keypoint, colored by its position in `correspondences`.
pub fn render_matches(
    query: &GrayImage,
    reference: &GrayImage,
    reference_keypoints: &[Keypoint],
    correspondences: &[Correspondence],
) -> Result<ColorImage, ImageError> {
    let mut canvas = hconcat(&to_rgb(query)?, &to_rgb(reference)?)?;
    let offset = query.width() as f64;

    for (i, c) in correspondences.iter().enumerate() {
        let Some(reference_kp) = reference_keypoints.get(c.reference_idx) else {
            continue;
        };
        let color = match_color(i);
        let start = pixel(c.query_pixel.x, c.query_pixel.y);
        let end = pixel(reference_kp.x as f64 + offset, reference_kp.y as f64);
        draw_circle(&mut canvas, start, KEYPOINT_RADIUS, color);
        draw_circle(&mut canvas, end, KEYPOINT_RADIUS, color);
        draw_line(&mut canvas, start, end, color, 1);
    }
    Ok(canvas)
}

// deterministic per-index palette
fn match_color(i: usize) -> [u8; 3] {
    let h = (i as u32).wrapping_mul(2_654_435_761);
    [
        64 + (h >> 24) as u8 % 192,
        64 + (h >> 16) as u8 % 192,
        64 + (h >> 8) as u8 % 192,
    ]
}
