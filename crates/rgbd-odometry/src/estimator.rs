use std::time::Instant;

use rgbd_3d::pnp::{solve_pnp_ransac, RansacParams};
use rgbd_3d::{CameraIntrinsics, Transform3D};
use rgbd_image::{ColorImage, DepthImage, GrayImage, ImageError};
use rgbd_imgproc::color::gray_from_rgb_u8;
use rgbd_imgproc::features::{
    match_nearest, refine_corners, DescriptorExtractor, Detector, Extractor, FeatureDetector,
    SubPixParams,
};

use crate::config::EstimatorConfig;
use crate::correspondence::{build_correspondences, Correspondence};
use crate::diagnostics::{
    render_keypoints, render_mask, render_matches, DiagnosticsSink, Overlay, Stage, StageTimings,
};
use crate::error::OdometryError;

/// Correspondences needed for a perspective pose solve.
pub const MIN_CORRESPONDENCES: usize = 4;

/// Value of the reference mask where the depth is valid.
const MASK_VALID: u8 = 255;

/// Outcome of one pose estimation.
///
/// A result with zero inliers carries the identity transform and must not be
/// trusted. Callers should check [`PoseEstimate::is_valid`] or the inlier count.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    /// Motion of the query camera expressed in the reference camera frame.
    ///
    /// Applied to a point in query camera coordinates it yields the point in
    /// reference camera coordinates.
    pub transform: Transform3D,
    /// Number of inlier correspondences.
    pub num_inliers: usize,
    /// The inlier correspondences.
    pub inliers: Vec<Correspondence>,
    /// Number of correspondences passed to RANSAC.
    pub num_candidates: usize,
    /// RMS reprojection error of the inliers, in pixels.
    pub reprojection_rmse: f64,
    /// RANSAC iterations run.
    pub iterations: usize,
    /// Stage durations, when profiling is enabled.
    pub timings: Option<StageTimings>,
}

impl PoseEstimate {
    fn degenerate(num_candidates: usize, timings: Option<StageTimings>) -> Self {
        Self {
            transform: Transform3D::identity(),
            num_inliers: 0,
            inliers: Vec::new(),
            num_candidates,
            reprojection_rmse: 0.0,
            iterations: 0,
            timings,
        }
    }

    /// Whether a pose was found.
    pub fn is_valid(&self) -> bool {
        self.num_inliers > 0
    }
}

/// Estimates the motion between a reference RGB-D frame and a query color frame.
///
/// The detector and descriptor are built once from the configuration. The
/// estimator holds no per-call state, so one instance can serve several
/// threads.
///
/// # Examples
///
/// ```no_run
/// use rgbd_3d::CameraIntrinsics;
/// use rgbd_image::{ColorImage, DepthImage};
/// use rgbd_odometry::{EstimatorConfig, PoseEstimator};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let intrinsics = CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5)?;
/// let estimator = PoseEstimator::new(EstimatorConfig::default(), intrinsics)?;
///
/// let reference_color = ColorImage::from_size_val([640, 480].into(), 0)?;
/// let reference_depth = DepthImage::from_size_val([640, 480].into(), 0)?;
/// let query_color = ColorImage::from_size_val([640, 480].into(), 0)?;
///
/// let estimate = estimator.estimate(&reference_color, &reference_depth, &query_color, None)?;
/// if estimate.is_valid() {
///     println!("{:?}", estimate.transform.to_xyz_rpy());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PoseEstimator {
    config: EstimatorConfig,
    intrinsics: CameraIntrinsics,
    detector: Detector,
    extractor: Extractor,
}

impl PoseEstimator {
    /// Create an estimator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or the intrinsics are invalid.
    pub fn new(config: EstimatorConfig, intrinsics: CameraIntrinsics) -> Result<Self, OdometryError> {
        config.validate()?;
        intrinsics.validate()?;

        let detector = Detector::new(config.detector, &config.detector_params);
        let extractor = Extractor::new(config.descriptor, config.detector_params.orb_scale_factor);

        Ok(Self {
            config,
            intrinsics,
            detector,
            extractor,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// The camera intrinsics in use.
    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Estimate the motion of the query camera relative to the reference frame.
    ///
    /// # Arguments
    ///
    /// * `reference_color` - The reference RGB image.
    /// * `reference_depth` - The reference depth in millimeters, registered to the color image.
    /// * `query_color` - The query RGB image, seen by the same camera.
    /// * `sink` - Optional receiver of stage timings and overlay images.
    ///
    /// # Returns
    ///
    /// The estimate. Without enough features or correspondences, or when no
    /// pose reaches the inlier minimum, the estimate has zero inliers and the
    /// identity transform.
    ///
    /// # Errors
    ///
    /// Returns [`OdometryError::InputShapeMismatch`] if the three images differ in size.
    pub fn estimate(
        &self,
        reference_color: &ColorImage,
        reference_depth: &DepthImage,
        query_color: &ColorImage,
        sink: Option<&mut dyn DiagnosticsSink>,
    ) -> Result<PoseEstimate, OdometryError> {
        let size = reference_color.size();
        if reference_depth.size() != size || query_color.size() != size {
            return Err(OdometryError::InputShapeMismatch {
                reference_color: size,
                reference_depth: reference_depth.size(),
                query_color: query_color.size(),
            });
        }

        let mut probe = Probe::new(&self.config, sink);

        let mut reference_gray = GrayImage::from_size_val(size, 0)?;
        gray_from_rgb_u8(reference_color, &mut reference_gray)?;
        let mut query_gray = GrayImage::from_size_val(size, 0)?;
        gray_from_rgb_u8(query_color, &mut query_gray)?;
        let mask = depth_mask(reference_depth)?;

        let (reference_keypoints, query_keypoints) = probe.time(Stage::Detection, || {
            let mut reference = self.detector.detect(&reference_gray, Some(&mask))?;
            let mut query = self.detector.detect(&query_gray, None)?;
            let half_window = self.config.detector_params.subpixel_window;
            if half_window > 0 {
                let subpix = SubPixParams {
                    half_window,
                    ..Default::default()
                };
                refine_corners(&reference_gray, &mut reference, &subpix)?;
                refine_corners(&query_gray, &mut query, &subpix)?;
            }
            Ok::<_, OdometryError>((reference, query))
        })?;
        log::debug!(
            "{} keypoints: {} reference, {} query",
            self.config.detector,
            reference_keypoints.len(),
            query_keypoints.len()
        );

        probe.overlay(Overlay::ReferenceKeypoints, || {
            render_keypoints(&reference_gray, &reference_keypoints)
        })?;
        probe.overlay(Overlay::QueryKeypoints, || {
            render_keypoints(&query_gray, &query_keypoints)
        })?;
        probe.overlay(Overlay::DepthMask, || render_mask(&mask))?;

        if reference_keypoints.is_empty() || query_keypoints.is_empty() {
            log::warn!(
                "Insufficient features: {} reference and {} query keypoints",
                reference_keypoints.len(),
                query_keypoints.len()
            );
            return Ok(PoseEstimate::degenerate(0, probe.finish()));
        }

        let ((reference_keypoints, reference_descriptors), (query_keypoints, query_descriptors)) =
            probe.time(Stage::Description, || {
                let reference = self.extractor.describe(&reference_gray, &reference_keypoints)?;
                let query = self.extractor.describe(&query_gray, &query_keypoints)?;
                Ok::<_, OdometryError>((reference, query))
            })?;
        log::debug!(
            "{} descriptors: {} reference, {} query",
            self.config.descriptor,
            reference_descriptors.len(),
            query_descriptors.len()
        );

        if reference_descriptors.is_empty() || query_descriptors.is_empty() {
            log::warn!("Insufficient features: no keypoint could be described in one of the images");
            return Ok(PoseEstimate::degenerate(0, probe.finish()));
        }

        let correspondences = probe.time(Stage::Matching, || {
            let matches = match_nearest(
                &query_descriptors,
                &reference_descriptors,
                self.config.max_descriptor_distance,
            )?;
            let correspondences = build_correspondences(
                &matches,
                &reference_keypoints,
                &query_keypoints,
                reference_depth,
                &self.intrinsics,
            );
            log::debug!(
                "{} matches below distance {}, {} with valid depth",
                matches.len(),
                self.config.max_descriptor_distance,
                correspondences.len()
            );
            Ok::<_, OdometryError>(correspondences)
        })?;

        probe.overlay(Overlay::CandidateMatches, || {
            render_matches(&query_gray, &reference_gray, &reference_keypoints, &correspondences)
        })?;

        let num_candidates = correspondences.len();
        if num_candidates < MIN_CORRESPONDENCES {
            log::warn!(
                "Degenerate geometry: {num_candidates} correspondences, at least {MIN_CORRESPONDENCES} needed"
            );
            return Ok(PoseEstimate::degenerate(num_candidates, probe.finish()));
        }

        let world: Vec<_> = correspondences.iter().map(|c| c.reference_point).collect();
        let image: Vec<_> = correspondences.iter().map(|c| c.query_pixel).collect();
        let params = RansacParams {
            max_iterations: self.config.ransac_iterations,
            reproj_threshold_px: self.config.reprojection_error_px as f64,
            min_inliers: self.config.min_inliers,
            random_seed: self.config.random_seed,
            ..Default::default()
        };

        let solved = probe.time(Stage::Solving, || {
            solve_pnp_ransac(&world, &image, &self.intrinsics, &params)
        });
        let ransac = match solved {
            Ok(ransac) => ransac,
            Err(e) => {
                log::warn!("No pose from {num_candidates} correspondences: {e}");
                return Ok(PoseEstimate::degenerate(num_candidates, probe.finish()));
            }
        };

        let inliers: Vec<Correspondence> = ransac.inliers.iter().map(|&i| correspondences[i]).collect();
        log::debug!(
            "PnP: {} of {num_candidates} inliers after {} iterations, rmse {:.3} px",
            inliers.len(),
            ransac.iterations,
            ransac.pose.reproj_rmse
        );

        probe.overlay(Overlay::InlierMatches, || {
            render_matches(&query_gray, &reference_gray, &reference_keypoints, &inliers)
        })?;

        // PnP maps reference camera points into the query camera
        let transform = ransac.pose.pose().inverse();

        Ok(PoseEstimate {
            transform,
            num_inliers: inliers.len(),
            inliers,
            num_candidates,
            reprojection_rmse: ransac.pose.reproj_rmse,
            iterations: ransac.iterations,
            timings: probe.finish(),
        })
    }
}

/// Mask with [`MASK_VALID`] where the depth has a measurement and `0` elsewhere.
fn depth_mask(depth: &DepthImage) -> Result<GrayImage, ImageError> {
    let data = depth
        .as_slice()
        .iter()
        .map(|&d| if d > 0 { MASK_VALID } else { 0 })
        .collect();
    GrayImage::new(depth.size(), data)
}

/// Forwards timings and overlays to the sink according to the configuration.
struct Probe<'a> {
    profile: bool,
    draw: bool,
    sink: Option<&'a mut dyn DiagnosticsSink>,
    timings: StageTimings,
}

impl<'a> Probe<'a> {
    fn new(config: &EstimatorConfig, sink: Option<&'a mut dyn DiagnosticsSink>) -> Self {
        Self {
            profile: config.profile,
            draw: config.draw_matches,
            sink,
            timings: StageTimings::default(),
        }
    }

    fn time<T>(&mut self, stage: Stage, f: impl FnOnce() -> T) -> T {
        if !self.profile {
            return f();
        }
        let start = Instant::now();
        let out = f();
        let elapsed = start.elapsed();

        log::info!("{stage} took {:.3} ms", elapsed.as_secs_f64() * 1e3);
        self.timings.record(stage, elapsed);
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.on_stage_timing(stage, elapsed);
        }
        out
    }

    fn overlay(
        &mut self,
        kind: Overlay,
        render: impl FnOnce() -> Result<ColorImage, ImageError>,
    ) -> Result<(), ImageError> {
        if !self.draw {
            return Ok(());
        }
        let Some(sink) = self.sink.as_deref_mut() else {
            return Ok(());
        };
        sink.on_overlay(kind, &render()?);
        Ok(())
    }

    fn finish(self) -> Option<StageTimings> {
        self.profile.then_some(self.timings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 100.0,
            fy: 100.0,
            cx: 32.0,
            cy: 24.0,
        }
    }

    #[test]
    fn test_depth_mask() -> Result<(), ImageError> {
        let depth = DepthImage::new([3, 1].into(), vec![0, 1, 65535])?;
        let mask = depth_mask(&depth)?;
        assert_eq!(mask.as_slice(), &[0, 255, 255]);
        Ok(())
    }

    #[test]
    fn test_new_rejects_invalid_input() {
        let bad_config = EstimatorConfig {
            ransac_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(
            PoseEstimator::new(bad_config, intrinsics()),
            Err(OdometryError::InvalidConfig(_))
        ));

        let bad_intrinsics = CameraIntrinsics {
            fx: 0.0,
            ..intrinsics()
        };
        assert!(matches!(
            PoseEstimator::new(EstimatorConfig::default(), bad_intrinsics),
            Err(OdometryError::Camera(_))
        ));
    }

    #[test]
    fn test_shape_mismatch() -> Result<(), OdometryError> {
        let estimator = PoseEstimator::new(EstimatorConfig::default(), intrinsics())?;
        let color = ColorImage::from_size_val([64, 48].into(), 0)?;
        let depth = DepthImage::from_size_val([64, 40].into(), 0)?;
        assert!(matches!(
            estimator.estimate(&color, &depth, &color, None),
            Err(OdometryError::InputShapeMismatch { .. })
        ));

        let depth = DepthImage::from_size_val([64, 48].into(), 0)?;
        let query = ColorImage::from_size_val([48, 64].into(), 0)?;
        assert!(matches!(
            estimator.estimate(&color, &depth, &query, None),
            Err(OdometryError::InputShapeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_flat_images_are_degenerate() -> Result<(), OdometryError> {
        let config = EstimatorConfig {
            profile: true,
            ..Default::default()
        };
        let estimator = PoseEstimator::new(config, intrinsics())?;
        let color = ColorImage::from_size_val([64, 48].into(), 128)?;
        let depth = DepthImage::from_size_val([64, 48].into(), 1000)?;

        let estimate = estimator.estimate(&color, &depth, &color, None)?;
        assert!(!estimate.is_valid());
        assert_eq!(estimate.num_inliers, 0);
        assert_eq!(estimate.transform, Transform3D::identity());
        assert!(estimate.timings.is_some());
        Ok(())
    }

    #[test]
    fn test_estimator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PoseEstimator>();
    }
}
