use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for camera models.
#[derive(Debug, Error, PartialEq)]
pub enum CameraError {
    /// A focal length is zero or not finite, so the matrix cannot be inverted.
    #[error("Focal lengths must be finite and non-zero, got fx={0} fy={1}")]
    InvalidFocalLength(f64, f64),

    /// The principal point is not finite.
    #[error("Principal point must be finite, got ({0}, {1})")]
    InvalidPrincipalPoint(f64, f64),

    /// The matrix is not of the form `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    #[error("Intrinsics matrix must have zero skew and a [0 0 1] last row, got {0:?}")]
    NonZeroSkew([f64; 9]),
}

/// Intrinsic parameters of a pinhole camera without skew.
///
/// # Fields
///
/// * `fx` - The focal length in the x direction, in pixels
/// * `fy` - The focal length in the y direction, in pixels
/// * `cx` - The x coordinate of the principal point
/// * `cy` - The y coordinate of the principal point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// The focal length in the x direction
    pub fx: f64,
    /// The focal length in the y direction
    pub fy: f64,
    /// The x coordinate of the principal point
    pub cx: f64,
    /// The y coordinate of the principal point
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Create validated intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, CameraError> {
        let intrinsics = Self { fx, fy, cx, cy };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Check that the focal lengths are usable and the principal point is finite.
    pub fn validate(&self) -> Result<(), CameraError> {
        let usable = |f: f64| f.is_finite() && f != 0.0;
        if !usable(self.fx) || !usable(self.fy) {
            return Err(CameraError::InvalidFocalLength(self.fx, self.fy));
        }
        if !self.cx.is_finite() || !self.cy.is_finite() {
            return Err(CameraError::InvalidPrincipalPoint(self.cx, self.cy));
        }
        Ok(())
    }

    /// Create intrinsics from a 3x3 camera matrix.
    pub fn from_matrix(k: &Matrix3<f64>) -> Result<Self, CameraError> {
        let form_ok = k[(0, 1)] == 0.0
            && k[(1, 0)] == 0.0
            && k[(2, 0)] == 0.0
            && k[(2, 1)] == 0.0
            && k[(2, 2)] == 1.0;
        if !form_ok {
            let mut row_major = [0.0; 9];
            for (i, v) in row_major.iter_mut().enumerate() {
                *v = k[(i / 3, i % 3)];
            }
            return Err(CameraError::NonZeroSkew(row_major));
        }
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    /// Create intrinsics from the row-major 9-element `K` array of a camera info record.
    pub fn from_k_array(k: &[f64; 9]) -> Result<Self, CameraError> {
        Self::from_matrix(&Matrix3::from_row_slice(k))
    }

    /// The row-major 9-element `K` array.
    pub fn to_k_array(&self) -> [f64; 9] {
        [
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        ]
    }

    /// The 3x3 camera matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::from_row_slice(&self.to_k_array())
    }

    /// The inverse of the camera matrix, in closed form.
    pub fn inverse_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// The 3x4 projection matrix `P = [K | 0]`.
    pub fn projection_matrix(&self) -> Matrix3x4<f64> {
        let mut p = Matrix3x4::zeros();
        p.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.matrix());
        p
    }

    /// Project a camera-frame point to pixel coordinates.
    ///
    /// Returns `None` for points with non-positive depth.
    pub fn project(&self, point: &Vector3<f64>) -> Option<Vector2<f64>> {
        if point.z <= 0.0 {
            return None;
        }
        Some(Vector2::new(
            self.fx * point.x / point.z + self.cx,
            self.fy * point.y / point.z + self.cy,
        ))
    }

    /// Back-project a pixel with metric depth into the camera frame.
    ///
    /// Computes `K⁻¹ · (u·d, v·d, d)`.
    pub fn backproject(&self, u: f64, v: f64, depth: f64) -> Vector3<f64> {
        self.inverse_matrix() * Vector3::new(u * depth, v * depth, depth)
    }
}

/// Calibration of a camera stream as published alongside its images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Pinhole intrinsics.
    pub intrinsics: CameraIntrinsics,
    /// Distortion coefficients, carried as given and never applied.
    #[serde(default)]
    pub distortion: Vec<f64>,
}

impl CameraInfo {
    /// Build a camera info record from a row-major `K` array.
    pub fn from_k_array(
        width: usize,
        height: usize,
        k: &[f64; 9],
        distortion: Vec<f64>,
    ) -> Result<Self, CameraError> {
        Ok(Self {
            width,
            height,
            intrinsics: CameraIntrinsics::from_k_array(k)?,
            distortion,
        })
    }

    /// The row-major 3x4 projection matrix `P = [K | 0]`.
    pub fn p_array(&self) -> [f64; 12] {
        let p = self.intrinsics.projection_matrix();
        let mut out = [0.0; 12];
        for (i, v) in out.iter_mut().enumerate() {
            *v = p[(i / 4, i % 4)];
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_k_array_round_trip() -> Result<(), CameraError> {
        let k = [525.0, 0.0, 319.5, 0.0, 525.0, 239.5, 0.0, 0.0, 1.0];
        let intrinsics = CameraIntrinsics::from_k_array(&k)?;
        assert_eq!(intrinsics.fx, 525.0);
        assert_eq!(intrinsics.cy, 239.5);
        assert_eq!(intrinsics.to_k_array(), k);
        Ok(())
    }

    #[test]
    fn test_invalid_intrinsics() {
        assert_eq!(
            CameraIntrinsics::new(0.0, 500.0, 320.0, 240.0),
            Err(CameraError::InvalidFocalLength(0.0, 500.0))
        );
        assert!(CameraIntrinsics::new(500.0, f64::NAN, 320.0, 240.0).is_err());
        assert!(CameraIntrinsics::new(500.0, 500.0, f64::INFINITY, 240.0).is_err());

        let skewed = [500.0, 1.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0];
        assert!(matches!(
            CameraIntrinsics::from_k_array(&skewed),
            Err(CameraError::NonZeroSkew(_))
        ));
    }

    #[test]
    fn test_inverse_and_projection() -> Result<(), CameraError> {
        let intrinsics = CameraIntrinsics::new(500.0, 400.0, 320.0, 240.0)?;
        let identity = intrinsics.matrix() * intrinsics.inverse_matrix();
        assert_relative_eq!(identity, Matrix3::identity(), epsilon = 1e-12);

        let p = intrinsics.backproject(100.0, 50.0, 2.0);
        let uv = intrinsics.project(&p).expect("point in front of the camera");
        assert_relative_eq!(uv.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(uv.y, 50.0, epsilon = 1e-9);
        assert!(intrinsics.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
        Ok(())
    }

    #[test]
    fn test_camera_info_projection_matrix() -> Result<(), CameraError> {
        let k = [500.0, 0.0, 320.0, 0.0, 400.0, 240.0, 0.0, 0.0, 1.0];
        let info = CameraInfo::from_k_array(640, 480, &k, vec![0.1, -0.2, 0.0, 0.0, 0.0])?;
        assert_eq!(
            info.p_array(),
            [500.0, 0.0, 320.0, 0.0, 0.0, 400.0, 240.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );
        assert_eq!(info.distortion.len(), 5);
        Ok(())
    }
}
