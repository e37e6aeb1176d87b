//! Feature detection, description and matching.
//!
//! Detectors and descriptor extractors form two closed sets of interchangeable
//! algorithms. Each one is selected by name through [`DetectorKind`] and
//! [`DescriptorKind`] and used through the [`FeatureDetector`] and
//! [`DescriptorExtractor`] traits:
//!
//! - **FAST**: segment test corners with non-maximum suppression
//! - **GFTT**: Shi-Tomasi "good features to track"
//! - **ORB**: FAST corners over a scale pyramid, ranked by Harris response and oriented
//!
//! Descriptors are either binary (BRIEF, ORB) and compared with the Hamming
//! distance, or floating point (PATCH) and compared with the Euclidean distance.
//! Detected corners can be moved to sub-pixel accuracy with [`refine_corners`].

use rgbd_image::{Image, ImageError};

mod algorithm;
pub use algorithm::*;

mod brief;
pub use brief::*;

mod descriptor;
pub use descriptor::*;

mod fast;
pub use fast::*;

mod gftt;
pub use gftt::*;

mod matcher;
pub use matcher::*;

mod orb;
pub use orb::*;

mod patch;
pub use patch::*;

mod subpix;
pub use subpix::*;

/// Errors raised by feature detection, description and matching.
#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    /// Error from an underlying image operation.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// The detector name is not one of the supported algorithms.
    #[error("Unknown feature detector `{0}`")]
    UnknownDetector(String),

    /// The descriptor name is not one of the supported algorithms.
    #[error("Unknown descriptor extractor `{0}`")]
    UnknownDescriptor(String),

    /// Two descriptor sets with different distance metrics were compared.
    #[error("Cannot compare {0:?} descriptors with {1:?} descriptors")]
    MetricMismatch(DistanceMetric, DistanceMetric),

    /// A detector or extractor parameter is out of range.
    #[error("Invalid feature parameter: {0}")]
    InvalidParameter(String),
}

/// A detected image feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Column of the keypoint in full resolution pixel coordinates.
    pub x: f32,
    /// Row of the keypoint in full resolution pixel coordinates.
    pub y: f32,
    /// Detector specific strength of the feature.
    pub response: f32,
    /// Diameter of the meaningful neighbourhood in full resolution pixels.
    pub size: f32,
    /// Dominant orientation in radians, if the detector computes one.
    pub angle: Option<f32>,
    /// Pyramid level the keypoint was detected on.
    pub octave: usize,
}

impl Keypoint {
    /// Create an unoriented level-0 keypoint.
    pub fn new(x: f32, y: f32, response: f32, size: f32) -> Self {
        Self {
            x,
            y,
            response,
            size,
            angle: None,
            octave: 0,
        }
    }
}

/// Capability shared by every feature detector.
///
/// Implementations are immutable and can be shared between threads.
pub trait FeatureDetector {
    /// Detect keypoints in a grayscale image.
    ///
    /// # Arguments
    ///
    /// * `image` - The grayscale image.
    /// * `mask` - Optional mask of the same size; keypoints are kept only where it is non-zero.
    fn detect(
        &self,
        image: &Image<u8, 1>,
        mask: Option<&Image<u8, 1>>,
    ) -> Result<Vec<Keypoint>, FeatureError>;
}

/// Capability shared by every descriptor extractor.
pub trait DescriptorExtractor {
    /// The metric used to compare the produced descriptors.
    fn metric(&self) -> DistanceMetric;

    /// Compute descriptors for the given keypoints.
    ///
    /// Keypoints that cannot be described, e.g. too close to the image border,
    /// are dropped. The returned keypoints are index-aligned with the descriptors.
    fn describe(
        &self,
        image: &Image<u8, 1>,
        keypoints: &[Keypoint],
    ) -> Result<(Vec<Keypoint>, Descriptors), FeatureError>;
}

/// Keep the keypoints lying on a non-zero pixel of `mask`.
pub(crate) fn filter_by_mask(
    keypoints: Vec<Keypoint>,
    mask: Option<&Image<u8, 1>>,
    image: &Image<u8, 1>,
) -> Result<Vec<Keypoint>, FeatureError> {
    let Some(mask) = mask else {
        return Ok(keypoints);
    };
    image.ensure_same_size(mask)?;

    Ok(keypoints
        .into_iter()
        .filter(|kp| {
            let (x, y) = (kp.x.round(), kp.y.round());
            x >= 0.0
                && y >= 0.0
                && mask
                    .pixel(x as usize, y as usize)
                    .is_some_and(|px| px[0] != 0)
        })
        .collect())
}

/// Sort keypoints by decreasing response and keep at most `n`.
///
/// The sort is stable so equal responses keep their detection order.
pub(crate) fn retain_best(keypoints: &mut Vec<Keypoint>, n: usize) {
    keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
    keypoints.truncate(n);
}
