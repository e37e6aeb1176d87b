use nalgebra::Vector3;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rgbd_3d::{CameraIntrinsics, Transform3D};
use rgbd_image::{ColorImage, DepthImage, ImageError, ImageSize};

pub const SIZE: ImageSize = ImageSize {
    width: 320,
    height: 240,
};

pub fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics {
        fx: 280.0,
        fy: 280.0,
        cx: 159.5,
        cy: 119.5,
    }
}

const TABLE_SIZE: usize = 128;

/// Two textured planes meeting in a vertical ridge, `z = apex + slope·|x|`.
///
/// The surface is painted with square cells of random gray levels, indexed by
/// the world `x` and `y` coordinates of the hit point.
pub struct VScene {
    apex_depth: f64,
    slope: f64,
    cell_size: f64,
    cells: Vec<u8>,
}

impl VScene {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            apex_depth: 2.0,
            slope: 0.5,
            cell_size: 0.05,
            cells: (0..TABLE_SIZE * TABLE_SIZE)
                .map(|_| rng.random_range(0..=255))
                .collect(),
        }
    }

    fn intersect(&self, origin: &Vector3<f64>, dir: &Vector3<f64>) -> Option<f64> {
        let mut nearest: Option<f64> = None;
        for side in [-1.0, 1.0] {
            let denom = dir.z - self.slope * side * dir.x;
            if denom.abs() < 1e-12 {
                continue;
            }
            let t = (self.apex_depth + self.slope * side * origin.x - origin.z) / denom;
            let x = origin.x + t * dir.x;
            if t > 0.0 && side * x >= 0.0 && nearest.map_or(true, |n| t < n) {
                nearest = Some(t);
            }
        }
        nearest
    }

    fn gray(&self, p: &Vector3<f64>) -> u8 {
        let n = TABLE_SIZE as i64;
        let i = ((p.x / self.cell_size).floor() as i64).rem_euclid(n);
        let j = ((p.y / self.cell_size).floor() as i64).rem_euclid(n);
        self.cells[(j * n + i) as usize]
    }

    /// Ray-cast the scene from a camera placed at `camera_pose` in the world frame.
    ///
    /// Each pixel is the mean gray of a 4x4 grid of rays over its footprint, so
    /// cell borders land at their sub-pixel position. Returns the color image
    /// and the depth along the optical axis at the pixel centre in millimeters.
    pub fn render(&self, camera_pose: &Transform3D) -> Result<(ColorImage, DepthImage), ImageError> {
        const SUBSAMPLES: usize = 4;
        let k = intrinsics();
        let mut color = ColorImage::from_size_val(SIZE, 0)?;
        let mut depth = DepthImage::from_size_val(SIZE, 0)?;
        let origin = camera_pose.translation();
        let cast = |x: f64, y: f64| {
            let dir = camera_pose.rotation() * Vector3::new((x - k.cx) / k.fx, (y - k.cy) / k.fy, 1.0);
            // the ray has unit z in the camera frame, so t is the depth
            self.intersect(origin, &dir).map(|t| (t, origin + dir * t))
        };

        for v in 0..SIZE.height {
            for u in 0..SIZE.width {
                let Some((t, _)) = cast(u as f64, v as f64) else {
                    continue;
                };
                let (mut sum, mut hits) = (0u32, 0u32);
                for sj in 0..SUBSAMPLES {
                    for si in 0..SUBSAMPLES {
                        let x = u as f64 - 0.5 + (si as f64 + 0.5) / SUBSAMPLES as f64;
                        let y = v as f64 - 0.5 + (sj as f64 + 0.5) / SUBSAMPLES as f64;
                        if let Some((_, p)) = cast(x, y) {
                            sum += self.gray(&p) as u32;
                            hits += 1;
                        }
                    }
                }
                let g = ((sum as f64) / (hits.max(1) as f64)).round() as u8;
                color.as_slice_mut()[(v * SIZE.width + u) * 3..][..3].fill(g);
                depth.set_pixel(u, v, 0, (t * 1000.0).round() as u16)?;
            }
        }

        Ok((color, depth))
    }
}

/// A small forward motion with a slight turn.
pub fn query_motion() -> Transform3D {
    Transform3D::from_xyz_rpy([0.06, -0.03, 0.10], [0.02, -0.03, 0.015])
}
