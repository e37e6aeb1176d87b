use rgbd_3d::CameraError;
use rgbd_image::{ImageError, ImageSize};
use rgbd_imgproc::features::FeatureError;

/// Errors raised by the pose estimator.
///
/// Running out of features or correspondences is not an error: the estimator
/// returns a result with zero inliers instead.
#[derive(Debug, thiserror::Error)]
pub enum OdometryError {
    /// The reference color, reference depth and query color images differ in size.
    #[error(
        "Input images must share one size, got reference color {reference_color}, \
         reference depth {reference_depth} and query color {query_color}"
    )]
    InputShapeMismatch {
        /// Size of the reference color image.
        reference_color: ImageSize,
        /// Size of the reference depth image.
        reference_depth: ImageSize,
        /// Size of the query color image.
        query_color: ImageSize,
    },

    /// Error from an underlying image operation.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// The camera intrinsics are not usable.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// The detector name is not one of the supported algorithms.
    #[error("Unknown feature detector `{0}`")]
    UnknownDetector(String),

    /// The descriptor name is not one of the supported algorithms.
    #[error("Unknown descriptor extractor `{0}`")]
    UnknownDescriptor(String),

    /// A configuration value is out of range.
    #[error("Invalid estimator configuration: {0}")]
    InvalidConfig(String),

    /// Error from feature detection, description or matching.
    #[error(transparent)]
    Feature(FeatureError),
}

impl From<FeatureError> for OdometryError {
    fn from(err: FeatureError) -> Self {
        match err {
            FeatureError::Image(e) => OdometryError::Image(e),
            FeatureError::UnknownDetector(name) => OdometryError::UnknownDetector(name),
            FeatureError::UnknownDescriptor(name) => OdometryError::UnknownDescriptor(name),
            FeatureError::InvalidParameter(msg) => OdometryError::InvalidConfig(msg),
            other => OdometryError::Feature(other),
        }
    }
}
