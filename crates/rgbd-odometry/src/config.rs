use rgbd_imgproc::features::{DescriptorKind, DetectorKind, DetectorParams};
use serde::{Deserialize, Serialize};

use crate::error::OdometryError;

/// Parameters of the [`PoseEstimator`](crate::PoseEstimator).
///
/// The defaults reproduce the OpenCV `solvePnPRansac` settings used by RGB-D
/// visual odometry front-ends: ORB features and descriptors, a Hamming cutoff
/// of 64 bits, 100 RANSAC iterations, an 8 pixel inlier threshold and 100
/// required inliers.
///
/// FAST keeps the 500 strongest corners by default. On textured scenes most
/// of its matches are still outliers, so FAST pipelines usually need several
/// hundred RANSAC iterations to reach the inlier minimum.
///
/// # Examples
///
/// ```
/// use rgbd_odometry::EstimatorConfig;
///
/// let config = EstimatorConfig {
///     ransac_iterations: 500,
///     random_seed: Some(42),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Keypoint detection algorithm.
    pub detector: DetectorKind,
    /// Descriptor algorithm.
    pub descriptor: DescriptorKind,
    /// Matches at or above this descriptor distance are rejected.
    ///
    /// Counted in bits for binary descriptors and in L2 units for PATCH.
    pub max_descriptor_distance: f32,
    /// Maximum number of RANSAC iterations.
    pub ransac_iterations: usize,
    /// Reprojection error in pixels below which a correspondence is an inlier.
    pub reprojection_error_px: f32,
    /// Inliers a pose hypothesis needs, clamped to the number of correspondences.
    pub min_inliers: usize,
    /// Render overlay images for the diagnostics sink.
    pub draw_matches: bool,
    /// Measure the duration of each pipeline stage.
    pub profile: bool,
    /// Fixed RANSAC seed for reproducible estimates.
    pub random_seed: Option<u64>,
    /// Tunable detector parameters.
    pub detector_params: DetectorParams,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::Orb,
            descriptor: DescriptorKind::Orb,
            max_descriptor_distance: 64.0,
            ransac_iterations: 100,
            reprojection_error_px: 8.0,
            min_inliers: 100,
            draw_matches: false,
            profile: false,
            random_seed: None,
            detector_params: DetectorParams::default(),
        }
    }
}

impl EstimatorConfig {
    /// Select the detector and descriptor by name, e.g. `"GFT"` and `"BRIEF"`.
    ///
    /// # Errors
    ///
    /// Returns [`OdometryError::UnknownDetector`] or
    /// [`OdometryError::UnknownDescriptor`] for names outside the supported set.
    pub fn with_algorithms(mut self, detector: &str, descriptor: &str) -> Result<Self, OdometryError> {
        self.detector = detector.parse()?;
        self.descriptor = descriptor.parse()?;
        Ok(self)
    }

    /// Check that every parameter is in range.
    ///
    /// # Errors
    ///
    /// Returns [`OdometryError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<(), OdometryError> {
        if !(self.max_descriptor_distance.is_finite() && self.max_descriptor_distance > 0.0) {
            return Err(OdometryError::InvalidConfig(format!(
                "max_descriptor_distance must be positive and finite, got {}",
                self.max_descriptor_distance
            )));
        }
        if !(self.reprojection_error_px.is_finite() && self.reprojection_error_px > 0.0) {
            return Err(OdometryError::InvalidConfig(format!(
                "reprojection_error_px must be positive and finite, got {}",
                self.reprojection_error_px
            )));
        }
        if self.ransac_iterations == 0 {
            return Err(OdometryError::InvalidConfig(
                "ransac_iterations must be at least 1".to_string(),
            ));
        }

        let params = &self.detector_params;
        if params.orb_scale_factor.is_nan() || params.orb_scale_factor < 1.0 {
            return Err(OdometryError::InvalidConfig(format!(
                "orb_scale_factor must be at least 1, got {}",
                params.orb_scale_factor
            )));
        }
        if params.orb_n_levels == 0 {
            return Err(OdometryError::InvalidConfig(
                "orb_n_levels must be at least 1".to_string(),
            ));
        }
        if params.fast_max_features == 0 {
            return Err(OdometryError::InvalidConfig(
                "fast_max_features must be at least 1".to_string(),
            ));
        }
        if !(params.gftt_quality_level > 0.0 && params.gftt_quality_level <= 1.0) {
            return Err(OdometryError::InvalidConfig(format!(
                "gftt_quality_level must be in (0, 1], got {}",
                params.gftt_quality_level
            )));
        }
        Ok(())
    }
}
