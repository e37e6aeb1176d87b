use nalgebra::{Vector2, Vector3};
use rgbd_3d::CameraIntrinsics;
use rgbd_image::DepthImage;
use rgbd_imgproc::features::{DescriptorMatch, Keypoint};

/// Millimeters per meter in the depth images.
pub const DEPTH_SCALE: f64 = 1000.0;

/// A reference feature lifted to 3D, paired with the query pixel it matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Back-projected reference keypoint in the reference camera frame, in meters.
    pub reference_point: Vector3<f64>,
    /// Matched query keypoint in pixels.
    pub query_pixel: Vector2<f64>,
    /// Index of the reference keypoint.
    pub reference_idx: usize,
    /// Index of the query keypoint.
    pub query_idx: usize,
    /// Descriptor distance of the match.
    pub distance: f32,
}

/// Read the depth in meters under a sub-pixel position.
///
/// The position is rounded to the nearest pixel. Returns `None` outside the
/// image and where the depth is `0`, i.e. missing.
pub fn sample_depth(depth: &DepthImage, x: f32, y: f32) -> Option<f64> {
    let (u, v) = (x.round(), y.round());
    if !(u >= 0.0 && v >= 0.0) {
        return None;
    }
    let mm = *depth.pixel(u as usize, v as usize)?.first()?;
    (mm > 0).then(|| mm as f64 / DEPTH_SCALE)
}

/// Lift matched reference keypoints to 3D.
///
/// Each match pairs a query keypoint (`query_idx`) with a reference keypoint
/// (`train_idx`). The reference keypoint is back-projected through `intrinsics`
/// at the depth sampled under it. Matches without a valid depth are skipped,
/// so the output keeps the order of `matches` but may be shorter.
pub fn build_correspondences(
    matches: &[DescriptorMatch],
    reference_keypoints: &[Keypoint],
    query_keypoints: &[Keypoint],
    reference_depth: &DepthImage,
    intrinsics: &CameraIntrinsics,
) -> Vec<Correspondence> {
    matches
        .iter()
        .filter_map(|m| {
            let reference = reference_keypoints.get(m.train_idx)?;
            let query = query_keypoints.get(m.query_idx)?;
            let depth = sample_depth(reference_depth, reference.x, reference.y)?;
            Some(Correspondence {
                reference_point: intrinsics.backproject(reference.x as f64, reference.y as f64, depth),
                query_pixel: Vector2::new(query.x as f64, query.y as f64),
                reference_idx: m.train_idx,
                query_idx: m.query_idx,
                distance: m.distance,
            })
        })
        .collect()
}
