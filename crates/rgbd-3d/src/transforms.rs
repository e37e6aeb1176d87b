use std::ops::Mul;

use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3};
use thiserror::Error;

use crate::pointcloud::PointCloud;

/// Tolerance on `‖RᵀR − I‖` and `|det R − 1|` when validating rotations.
pub const ORTHONORMAL_TOLERANCE: f64 = 1e-6;

/// Error types for the transforms module.
#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    /// The rotation block is not orthonormal with determinant +1.
    #[error("Rotation is not orthonormal: |RtR - I| = {0}, det = {1}")]
    NotOrthonormal(f64, f64),

    /// The last row of a homogeneous matrix is not `[0 0 0 1]`.
    #[error("Homogeneous matrix must end with [0 0 0 1], got {0:?}")]
    InvalidHomogeneousRow([f64; 4]),

    /// Two slices that must be element-aligned have different lengths.
    #[error("Length mismatch: {0} ({1}) != {2} ({3})")]
    LengthMismatch(&'static str, usize, &'static str, usize),
}

/// A rigid-body transform: a rotation followed by a translation.
///
/// Maps a point `p` to `R·p + t`. The rotation is stored as a
/// [`Rotation3`], so every value of this type is a proper rigid motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform3D {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Create a transform from a rotation and a translation.
    pub fn from_parts(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a transform from a raw 3x3 matrix and a translation.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::NotOrthonormal`] unless `RᵀR ≈ I` and `det R ≈ 1`.
    pub fn from_matrix_translation(
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
    ) -> Result<Self, TransformError> {
        let residual = (rotation.transpose() * rotation - Matrix3::identity()).norm();
        let det = rotation.determinant();
        if !residual.is_finite()
            || residual > ORTHONORMAL_TOLERANCE
            || (det - 1.0).abs() > ORTHONORMAL_TOLERANCE
        {
            return Err(TransformError::NotOrthonormal(residual, det));
        }
        Ok(Self::from_parts(
            Rotation3::from_matrix_unchecked(*rotation),
            *translation,
        ))
    }

    /// Create a transform from a 4x4 homogeneous matrix.
    pub fn from_homogeneous(m: &Matrix4<f64>) -> Result<Self, TransformError> {
        let last_row = [m[(3, 0)], m[(3, 1)], m[(3, 2)], m[(3, 3)]];
        if last_row != [0.0, 0.0, 0.0, 1.0] {
            return Err(TransformError::InvalidHomogeneousRow(last_row));
        }
        let rotation: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let translation: Vector3<f64> = m.fixed_view::<3, 1>(0, 3).into_owned();
        Self::from_matrix_translation(&rotation, &translation)
    }

    /// The 4x4 homogeneous matrix of this transform.
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// Create a transform from a row-major 4x4 array.
    pub fn from_array(m: &[[f64; 4]; 4]) -> Result<Self, TransformError> {
        Self::from_homogeneous(&Matrix4::from_fn(|r, c| m[r][c]))
    }

    /// The row-major 4x4 array of this transform.
    pub fn to_array(&self) -> [[f64; 4]; 4] {
        let m = self.to_homogeneous();
        std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)]))
    }

    /// Create a transform from a position and roll, pitch, yaw angles in radians.
    ///
    /// Roll turns about X, pitch about Y and yaw about Z, composed as
    /// `R = Rz(yaw) · Ry(pitch) · Rx(roll)`.
    pub fn from_xyz_rpy(xyz: [f64; 3], rpy: [f64; 3]) -> Self {
        Self::from_parts(
            Rotation3::from_euler_angles(rpy[0], rpy[1], rpy[2]),
            Vector3::from(xyz),
        )
    }

    /// The position and roll, pitch, yaw angles of this transform.
    ///
    /// At gimbal lock (`|pitch| = π/2`) roll and yaw are not unique; the
    /// returned pair still reproduces the same rotation.
    pub fn to_xyz_rpy(&self) -> ([f64; 3], [f64; 3]) {
        let (roll, pitch, yaw) = self.rotation.euler_angles();
        (self.translation.into(), [roll, pitch, yaw])
    }

    /// The rotation part.
    #[inline]
    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.rotation
    }

    /// The translation part.
    #[inline]
    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// The inverse transform, `(Rᵀ, −Rᵀ·t)`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self::from_parts(rotation, -(rotation * self.translation))
    }

    /// Apply the transform to a point.
    #[inline]
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }
}

impl Mul for Transform3D {
    type Output = Transform3D;

    fn mul(self, rhs: Transform3D) -> Transform3D {
        &self * &rhs
    }
}

impl Mul<&Transform3D> for &Transform3D {
    type Output = Transform3D;

    fn mul(self, rhs: &Transform3D) -> Transform3D {
        Transform3D::from_parts(
            self.rotation * rhs.rotation,
            self.rotation * rhs.translation + self.translation,
        )
    }
}

/// Translation length and rotation angle of a motion.
///
/// The angle is `acos((trace(R) − 1) / 2)` with the argument clamped to
/// `[−1, 1]`, so it always lies in `[0, π]`.
pub fn difference(motion: &Transform3D) -> (f64, f64) {
    (motion.translation.norm(), rotation_angle(motion))
}

/// Translation length and rotation angle of the motion `a⁻¹ · b`.
pub fn difference_between(a: &Transform3D, b: &Transform3D) -> (f64, f64) {
    difference(&(a.inverse() * *b))
}

/// Whether a motion is at least `max_dist` long or turns more than `max_angle`.
///
/// The angle is only computed when the distance test does not already decide.
pub fn exceeds_threshold(motion: &Transform3D, max_dist: f64, max_angle: f64) -> bool {
    if motion.translation.norm() >= max_dist {
        return true;
    }
    rotation_angle(motion) > max_angle
}

fn rotation_angle(motion: &Transform3D) -> f64 {
    let trace = motion.rotation.matrix().trace();
    ((trace - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
}

/// Apply a transform to every mean.
pub fn transform_means(means: &[Vector3<f64>], transform: &Transform3D) -> Vec<Vector3<f64>> {
    means.iter().map(|m| transform.transform_point(m)).collect()
}

/// Apply a transform to Gaussian distributions.
///
/// Means map to `R·m + t` and covariances to `R·Σ·Rᵀ`.
pub fn transform_distributions(
    means: &[Vector3<f64>],
    covariances: &[Matrix3<f64>],
    transform: &Transform3D,
) -> Result<(Vec<Vector3<f64>>, Vec<Matrix3<f64>>), TransformError> {
    if means.len() != covariances.len() {
        return Err(TransformError::LengthMismatch(
            "means",
            means.len(),
            "covariances",
            covariances.len(),
        ));
    }
    let r = transform.rotation.matrix();
    let rt = r.transpose();
    let covariances = covariances.iter().map(|c| r * c * rt).collect();
    Ok((transform_means(means, transform), covariances))
}

/// Keep the means flagged as valid, in order.
pub fn remove_invalid_means(
    means: &[Vector3<f64>],
    valid: &[bool],
) -> Result<Vec<Vector3<f64>>, TransformError> {
    if means.len() != valid.len() {
        return Err(TransformError::LengthMismatch(
            "means",
            means.len(),
            "valid",
            valid.len(),
        ));
    }
    Ok(means
        .iter()
        .zip(valid)
        .filter(|(_, &ok)| ok)
        .map(|(m, _)| *m)
        .collect())
}

/// Keep the distributions flagged as valid, in order.
pub fn remove_invalid_distributions(
    means: &[Vector3<f64>],
    covariances: &[Matrix3<f64>],
    valid: &[bool],
) -> Result<(Vec<Vector3<f64>>, Vec<Matrix3<f64>>), TransformError> {
    if covariances.len() != means.len() {
        return Err(TransformError::LengthMismatch(
            "means",
            means.len(),
            "covariances",
            covariances.len(),
        ));
    }
    let means_f = remove_invalid_means(means, valid)?;
    let covariances_f = covariances
        .iter()
        .zip(valid)
        .filter(|(_, &ok)| ok)
        .map(|(c, _)| *c)
        .collect();
    Ok((means_f, covariances_f))
}

/// Build an uncolored point cloud from a set of means.
pub fn point_cloud_from_means(means: &[Vector3<f64>]) -> PointCloud {
    PointCloud::new(means.iter().map(|m| [m.x, m.y, m.z]).collect(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_identity_difference() {
        let (dist, angle) = difference(&Transform3D::identity());
        assert_eq!(dist, 0.0);
        assert_eq!(angle, 0.0);

        let t = Transform3D::from_xyz_rpy([1.0, -2.0, 0.5], [0.1, 0.2, -0.3]);
        let (dist, angle) = difference_between(&t, &t);
        assert_abs_diff_eq!(dist, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angle, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_difference_values() {
        let t = Transform3D::from_xyz_rpy([3.0, 4.0, 0.0], [0.0, 0.0, 0.5]);
        let (dist, angle) = difference(&t);
        assert_relative_eq!(dist, 5.0);
        assert_relative_eq!(angle, 0.5, epsilon = 1e-12);

        let half_turn = Transform3D::from_xyz_rpy([0.0; 3], [PI, 0.0, 0.0]);
        assert_relative_eq!(difference(&half_turn).1, PI, epsilon = 1e-9);
    }

    #[test]
    fn test_homogeneous_round_trip() -> Result<(), TransformError> {
        let t = Transform3D::from_xyz_rpy([0.3, -0.1, 2.0], [0.4, -0.2, 1.1]);
        let back = Transform3D::from_homogeneous(&t.to_homogeneous())?;
        assert_relative_eq!(
            back.to_homogeneous(),
            t.to_homogeneous(),
            epsilon = 1e-12
        );

        let arr = t.to_array();
        assert_eq!(arr[3], [0.0, 0.0, 0.0, 1.0]);
        let back = Transform3D::from_array(&arr)?;
        assert_relative_eq!(*back.translation(), *t.translation(), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_invalid_matrices() {
        let scaled = Matrix3::identity() * 2.0;
        assert!(matches!(
            Transform3D::from_matrix_translation(&scaled, &Vector3::zeros()),
            Err(TransformError::NotOrthonormal(..))
        ));

        // a reflection is orthogonal but not a rotation
        let reflection = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));
        assert!(Transform3D::from_matrix_translation(&reflection, &Vector3::zeros()).is_err());

        let mut m = Matrix4::identity();
        m[(3, 0)] = 0.5;
        assert_eq!(
            Transform3D::from_homogeneous(&m),
            Err(TransformError::InvalidHomogeneousRow([0.5, 0.0, 0.0, 1.0]))
        );
    }

    #[test]
    fn test_euler_round_trip() {
        let xyz = [1.0, 2.0, 3.0];
        let rpy = [0.3, -0.4, 2.5];
        let t = Transform3D::from_xyz_rpy(xyz, rpy);
        let (xyz_out, rpy_out) = t.to_xyz_rpy();
        for i in 0..3 {
            assert_relative_eq!(xyz_out[i], xyz[i]);
            assert_relative_eq!(rpy_out[i], rpy[i], epsilon = 1e-9);
        }

        // yaw only: R = Rz
        let yaw = Transform3D::from_xyz_rpy([0.0; 3], [0.0, 0.0, FRAC_PI_2]);
        let p = yaw.transform_point(&Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);

        // at gimbal lock the angles differ but the rotation is the same
        let locked = Transform3D::from_xyz_rpy([0.0; 3], [0.2, FRAC_PI_2, 0.5]);
        let (_, rpy_locked) = locked.to_xyz_rpy();
        let rebuilt = Transform3D::from_xyz_rpy([0.0; 3], rpy_locked);
        assert_relative_eq!(
            *rebuilt.rotation().matrix(),
            *locked.rotation().matrix(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_compose_and_inverse() {
        let a = Transform3D::from_xyz_rpy([1.0, 0.0, 0.0], [0.0, 0.0, FRAC_PI_2]);
        let b = Transform3D::from_xyz_rpy([0.0, 2.0, 0.0], [0.1, 0.0, 0.0]);
        let p = Vector3::new(0.5, -0.5, 1.0);

        let ab = a * b;
        assert_relative_eq!(
            ab.transform_point(&p),
            a.transform_point(&b.transform_point(&p)),
            epsilon = 1e-12
        );

        let id = a * a.inverse();
        let (dist, angle) = difference(&id);
        assert_abs_diff_eq!(dist, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angle, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_exceeds_threshold_monotonic() {
        let max_dist = 0.1;
        let max_angle = 0.2;
        assert!(!exceeds_threshold(
            &Transform3D::identity(),
            max_dist,
            max_angle
        ));

        // the distance bound is inclusive, the angle bound is not
        let at_dist = Transform3D::from_xyz_rpy([0.1, 0.0, 0.0], [0.0; 3]);
        assert!(exceeds_threshold(&at_dist, max_dist, max_angle));

        let mut previous = false;
        for i in 0..40 {
            let s = i as f64 * 0.01;
            let t = Transform3D::from_xyz_rpy([s * 0.3, 0.0, 0.0], [0.0, 0.0, s]);
            let exceeded = exceeds_threshold(&t, max_dist, max_angle);
            assert!(exceeded || !previous, "threshold flipped back at step {i}");
            previous = exceeded;
        }
        assert!(previous);
    }

    #[test]
    fn test_transform_distributions() -> Result<(), TransformError> {
        let t = Transform3D::from_xyz_rpy([1.0, 2.0, 3.0], [0.0, 0.0, FRAC_PI_2]);
        let means = vec![Vector3::new(1.0, 0.0, 0.0)];
        let covariances = vec![Matrix3::from_diagonal(&Vector3::new(4.0, 1.0, 9.0))];

        let (m, c) = transform_distributions(&means, &covariances, &t)?;
        assert_relative_eq!(m[0], Vector3::new(1.0, 3.0, 3.0), epsilon = 1e-12);
        // a quarter turn about z swaps the x and y variances
        assert_relative_eq!(
            c[0],
            Matrix3::from_diagonal(&Vector3::new(1.0, 4.0, 9.0)),
            epsilon = 1e-12
        );

        assert!(matches!(
            transform_distributions(&means, &[], &t),
            Err(TransformError::LengthMismatch(..))
        ));
        Ok(())
    }

    #[test]
    fn test_remove_invalid() -> Result<(), TransformError> {
        let means: Vec<_> = (0..4).map(|i| Vector3::new(i as f64, 0.0, 0.0)).collect();
        let covariances: Vec<_> = (0..4).map(|i| Matrix3::identity() * i as f64).collect();
        let valid = [true, false, true, false];

        let kept = remove_invalid_means(&means, &valid)?;
        assert_eq!(kept, vec![means[0], means[2]]);

        let (m, c) = remove_invalid_distributions(&means, &covariances, &valid)?;
        assert_eq!(m.len(), 2);
        assert_eq!(c[1], covariances[2]);

        assert!(remove_invalid_means(&means, &valid[..3]).is_err());
        assert!(remove_invalid_distributions(&means, &covariances[..1], &valid).is_err());
        Ok(())
    }

    #[test]
    fn test_point_cloud_from_means() {
        let means = vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-1.0, 0.0, 0.5)];
        let cloud = point_cloud_from_means(&means);
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points()[1], [-1.0, 0.0, 0.5]);
        assert!(cloud.colors().is_none());
    }
}
