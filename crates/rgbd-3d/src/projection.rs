use nalgebra::Vector3;
use rgbd_image::{ColorImage, DepthImage, ImageError, ImageSize};
use thiserror::Error;

use crate::camera::{CameraError, CameraIntrinsics};
use crate::pointcloud::{is_valid_point, PointCloud};
use crate::transforms::Transform3D;

/// Color given to points of a cloud without colors.
pub const DEFAULT_POINT_COLOR: [u8; 3] = [255, 255, 255];

/// Error types for cloud projection.
#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    /// The output image could not be created.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// The camera intrinsics are not usable.
    #[error(transparent)]
    Camera(#[from] CameraError),
}

/// Render a point cloud into a virtual camera with a depth z-buffer.
///
/// `pose` maps cloud-frame points into the camera frame. Each point is
/// projected with `intrinsics` and its pixel is the truncation of the projected
/// coordinates. The stored depth is `round(z · 1000)`: it is rounded to the
/// nearest millimeter, not truncated. Points with NaN coordinates, a depth
/// that rounds to zero or below, depth beyond `u16::MAX` millimeters or pixels
/// outside the image are skipped.
///
/// When several points land on the same pixel the one with the smallest
/// camera-frame `z` is kept. The comparison uses the unrounded depth, so the
/// output does not depend on the order of the points, even for depths that
/// round to the same millimeter. Only points of exactly equal `z` keep the
/// first one.
///
/// # Arguments
///
/// * `cloud` - The points to render. Points without a color render white.
/// * `pose` - Transform from the cloud frame to the camera frame.
/// * `intrinsics` - The virtual camera.
/// * `size` - Size of the output images.
///
/// # Returns
///
/// The rendered color image and the depth image in millimeters, where 0 means
/// that no point reached the pixel.
///
/// # Errors
///
/// Returns [`ImageError::EmptyImage`] if `size` has a zero side.
pub fn project_cloud_to_image(
    cloud: &PointCloud,
    pose: &Transform3D,
    intrinsics: &CameraIntrinsics,
    size: ImageSize,
) -> Result<(ColorImage, DepthImage), ProjectionError> {
    if size.width == 0 || size.height == 0 {
        return Err(ImageError::EmptyImage(size.width, size.height).into());
    }
    intrinsics.validate()?;

    let mut color = ColorImage::from_size_val(size, 0)?;
    let mut depth = DepthImage::from_size_val(size, 0)?;
    let (width, height) = (size.width as i64, size.height as i64);

    // nearest camera-frame depth per pixel, in meters
    let mut zbuf = vec![f64::INFINITY; size.width * size.height];

    let k = intrinsics.matrix();
    let r = pose.rotation().matrix();
    let t = pose.translation();

    for (i, p) in cloud.points().iter().enumerate() {
        if !is_valid_point(p) {
            continue;
        }
        let p_cam = r * Vector3::from(*p) + t;

        let z_mm = (p_cam.z * 1000.0).round();
        if z_mm <= 0.0 || z_mm > u16::MAX as f64 {
            continue;
        }
        let z_mm = z_mm as u16;

        let uvw = k * p_cam;
        let u = (uvw.x / uvw.z) as i64;
        let v = (uvw.y / uvw.z) as i64;
        if u < 0 || v < 0 || u >= width || v >= height {
            continue;
        }

        let idx = v as usize * size.width + u as usize;
        if p_cam.z >= zbuf[idx] {
            continue;
        }

        zbuf[idx] = p_cam.z;
        depth.as_slice_mut()[idx] = z_mm;
        let rgb = cloud.color(i).unwrap_or(DEFAULT_POINT_COLOR);
        color.as_slice_mut()[3 * idx..3 * idx + 3].copy_from_slice(&rgb);
    }

    Ok((color, depth))
}
