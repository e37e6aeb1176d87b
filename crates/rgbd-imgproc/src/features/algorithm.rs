use std::fmt;
use std::str::FromStr;

use rgbd_image::Image;
use serde::{Deserialize, Serialize};

use super::{
    BriefExtractor, CornerMeasure, DescriptorExtractor, Descriptors, DistanceMetric,
    FastDetector, FeatureDetector, FeatureError, GfttDetector, Keypoint, OrbDetector,
    OrbExtractor, PatchExtractor, SubPixParams,
};

/// Name of a supported feature detection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DetectorKind {
    /// FAST segment test corners.
    Fast,
    /// Shi-Tomasi good features to track.
    Gftt,
    /// Oriented FAST over a scale pyramid.
    Orb,
}

impl FromStr for DetectorKind {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FAST" => Ok(DetectorKind::Fast),
            "GFT" | "GFTT" => Ok(DetectorKind::Gftt),
            "ORB" => Ok(DetectorKind::Orb),
            _ => Err(FeatureError::UnknownDetector(s.to_string())),
        }
    }
}

impl TryFrom<String> for DetectorKind {
    type Error = FeatureError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorKind::Fast => "FAST",
            DetectorKind::Gftt => "GFTT",
            DetectorKind::Orb => "ORB",
        };
        f.write_str(name)
    }
}

impl From<DetectorKind> for String {
    fn from(kind: DetectorKind) -> Self {
        kind.to_string()
    }
}

/// Name of a supported descriptor algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DescriptorKind {
    /// Binary tests on a smoothed patch.
    Brief,
    /// Binary tests steered by the keypoint orientation.
    Orb,
    /// Normalized intensity patch.
    Patch,
}

impl DescriptorKind {
    /// The metric descriptors of this kind are compared with.
    pub fn metric(&self) -> DistanceMetric {
        match self {
            DescriptorKind::Brief | DescriptorKind::Orb => DistanceMetric::Hamming,
            DescriptorKind::Patch => DistanceMetric::Euclidean,
        }
    }
}

impl FromStr for DescriptorKind {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BRIEF" => Ok(DescriptorKind::Brief),
            "ORB" => Ok(DescriptorKind::Orb),
            "PATCH" => Ok(DescriptorKind::Patch),
            _ => Err(FeatureError::UnknownDescriptor(s.to_string())),
        }
    }
}

impl TryFrom<String> for DescriptorKind {
    type Error = FeatureError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptorKind::Brief => "BRIEF",
            DescriptorKind::Orb => "ORB",
            DescriptorKind::Patch => "PATCH",
        };
        f.write_str(name)
    }
}

impl From<DescriptorKind> for String {
    fn from(kind: DescriptorKind) -> Self {
        kind.to_string()
    }
}

/// Tunable parameters of the detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Number of strongest FAST corners kept.
    pub fast_max_features: usize,
    /// Maximum number of GFTT corners.
    pub gftt_max_corners: usize,
    /// GFTT quality level relative to the best corner.
    pub gftt_quality_level: f32,
    /// GFTT minimum distance between corners, in pixels.
    pub gftt_min_distance: f32,
    /// Maximum number of ORB keypoints.
    pub orb_n_features: usize,
    /// ORB pyramid scale factor.
    pub orb_scale_factor: f32,
    /// ORB pyramid levels.
    pub orb_n_levels: usize,
    /// ORB FAST threshold.
    pub orb_fast_threshold: u8,
    /// ORB border exclusion in pixels.
    pub orb_edge_threshold: usize,
    /// Half window of the sub-pixel corner refinement, 0 to disable it.
    pub subpixel_window: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        let fast = FastDetector::default();
        let gftt = GfttDetector::default();
        let orb = OrbDetector::default();
        Self {
            fast_threshold: fast.threshold,
            fast_max_features: 500,
            gftt_max_corners: gftt.max_corners,
            gftt_quality_level: gftt.quality_level,
            gftt_min_distance: gftt.min_distance,
            orb_n_features: orb.n_features,
            orb_scale_factor: orb.scale_factor,
            orb_n_levels: orb.n_levels,
            orb_fast_threshold: orb.fast_threshold,
            orb_edge_threshold: orb.edge_threshold,
            subpixel_window: SubPixParams::default().half_window,
        }
    }
}

/// One of the supported feature detectors.
#[derive(Debug, Clone, PartialEq)]
pub enum Detector {
    /// FAST corners.
    Fast(FastDetector),
    /// Good features to track.
    Gftt(GfttDetector),
    /// Oriented FAST.
    Orb(OrbDetector),
}

impl Detector {
    /// Build the detector named by `kind`.
    pub fn new(kind: DetectorKind, params: &DetectorParams) -> Self {
        match kind {
            DetectorKind::Fast => Detector::Fast(FastDetector {
                threshold: params.fast_threshold,
                max_features: Some(params.fast_max_features),
                ..Default::default()
            }),
            DetectorKind::Gftt => Detector::Gftt(GfttDetector {
                max_corners: params.gftt_max_corners,
                quality_level: params.gftt_quality_level,
                min_distance: params.gftt_min_distance,
                measure: CornerMeasure::MinEigenValue,
                ..Default::default()
            }),
            DetectorKind::Orb => Detector::Orb(OrbDetector {
                n_features: params.orb_n_features,
                scale_factor: params.orb_scale_factor,
                n_levels: params.orb_n_levels,
                fast_threshold: params.orb_fast_threshold,
                edge_threshold: params.orb_edge_threshold,
                ..Default::default()
            }),
        }
    }

    /// The algorithm name of this detector.
    pub fn kind(&self) -> DetectorKind {
        match self {
            Detector::Fast(_) => DetectorKind::Fast,
            Detector::Gftt(_) => DetectorKind::Gftt,
            Detector::Orb(_) => DetectorKind::Orb,
        }
    }
}

impl FeatureDetector for Detector {
    fn detect(
        &self,
        image: &Image<u8, 1>,
        mask: Option<&Image<u8, 1>>,
    ) -> Result<Vec<Keypoint>, FeatureError> {
        match self {
            Detector::Fast(d) => d.detect(image, mask),
            Detector::Gftt(d) => d.detect(image, mask),
            Detector::Orb(d) => d.detect(image, mask),
        }
    }
}

/// One of the supported descriptor extractors.
#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    /// BRIEF descriptor.
    Brief(BriefExtractor),
    /// Rotated BRIEF descriptor.
    Orb(OrbExtractor),
    /// Normalized patch descriptor.
    Patch(PatchExtractor),
}

impl Extractor {
    /// Build the extractor named by `kind`.
    ///
    /// `scale_factor` must match the pyramid the keypoints were detected on.
    pub fn new(kind: DescriptorKind, scale_factor: f32) -> Self {
        match kind {
            DescriptorKind::Brief => Extractor::Brief(BriefExtractor {
                scale_factor,
                ..Default::default()
            }),
            DescriptorKind::Orb => Extractor::Orb(OrbExtractor {
                scale_factor,
                ..Default::default()
            }),
            DescriptorKind::Patch => Extractor::Patch(PatchExtractor {
                scale_factor,
                ..Default::default()
            }),
        }
    }

    /// The algorithm name of this extractor.
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Extractor::Brief(_) => DescriptorKind::Brief,
            Extractor::Orb(_) => DescriptorKind::Orb,
            Extractor::Patch(_) => DescriptorKind::Patch,
        }
    }
}

impl DescriptorExtractor for Extractor {
    fn metric(&self) -> DistanceMetric {
        self.kind().metric()
    }

    fn describe(
        &self,
        image: &Image<u8, 1>,
        keypoints: &[Keypoint],
    ) -> Result<(Vec<Keypoint>, Descriptors), FeatureError> {
        match self {
            Extractor::Brief(e) => e.describe(image, keypoints),
            Extractor::Orb(e) => e.describe(image, keypoints),
            Extractor::Patch(e) => e.describe(image, keypoints),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_kind_names() -> Result<(), FeatureError> {
        assert_eq!("FAST".parse::<DetectorKind>()?, DetectorKind::Fast);
        assert_eq!("gft".parse::<DetectorKind>()?, DetectorKind::Gftt);
        assert_eq!("GFTT".parse::<DetectorKind>()?, DetectorKind::Gftt);
        assert_eq!("orb".parse::<DetectorKind>()?, DetectorKind::Orb);
        assert!(matches!(
            "SURF".parse::<DetectorKind>(),
            Err(FeatureError::UnknownDetector(name)) if name == "SURF"
        ));
        assert!("STAR".parse::<DetectorKind>().is_err());
        Ok(())
    }

    #[test]
    fn test_descriptor_kind_names() -> Result<(), FeatureError> {
        assert_eq!("BRIEF".parse::<DescriptorKind>()?, DescriptorKind::Brief);
        assert_eq!("Orb".parse::<DescriptorKind>()?, DescriptorKind::Orb);
        assert_eq!("PATCH".parse::<DescriptorKind>()?, DescriptorKind::Patch);
        assert!(matches!(
            "SIFT".parse::<DescriptorKind>(),
            Err(FeatureError::UnknownDescriptor(_))
        ));
        assert_eq!(DescriptorKind::Patch.metric(), DistanceMetric::Euclidean);
        assert_eq!(DescriptorKind::Brief.to_string(), "BRIEF");
        Ok(())
    }

    #[test]
    fn test_build_from_kind() {
        let params = DetectorParams {
            fast_threshold: 33,
            ..Default::default()
        };
        match Detector::new(DetectorKind::Fast, &params) {
            Detector::Fast(d) => {
                assert_eq!(d.threshold, 33);
                assert_eq!(d.max_features, Some(500));
            }
            other => panic!("unexpected detector {other:?}"),
        }
        assert_eq!(Detector::new(DetectorKind::Orb, &params).kind(), DetectorKind::Orb);

        let extractor = Extractor::new(DescriptorKind::Patch, 1.2);
        assert_eq!(extractor.kind(), DescriptorKind::Patch);
        assert_eq!(extractor.metric(), DistanceMetric::Euclidean);
    }
}
