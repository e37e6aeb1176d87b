//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: [Lepetit et al., IJCV 2009](https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf)
//! Reference: [OpenCV EPnP implementation](https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp)

use nalgebra::{DMatrix, DVector, Matrix3, SVector, Vector2, Vector3};

use super::ops::{compute_centroid, kabsch, rmse_px};
use super::{check_lengths, NumericTol, PnPError, PnPResult};
use crate::camera::CameraIntrinsics;

type NullVector = SVector<f64, 12>;

/// Control point pairs, in the order of the rows of `L` and `rho`.
const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

const GAUSS_NEWTON_ITERATIONS: usize = 5;

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
}

/// Solve Perspective-n-Point with EPnP.
///
/// # Arguments
///
/// * `points_world` - 3-D coordinates in the world frame, `N ≥ 4`.
/// * `points_image` - Corresponding pixel coordinates.
/// * `intrinsics` - Pinhole camera intrinsics.
/// * `params` - Solver tolerances.
///
/// # Returns
///
/// The world-to-camera rotation and translation, with the RMS reprojection
/// error over all points.
pub fn solve_epnp(
    points_world: &[Vector3<f64>],
    points_image: &[Vector2<f64>],
    intrinsics: &CameraIntrinsics,
    params: &EPnPParams,
) -> Result<PnPResult, PnPError> {
    check_lengths(points_world.len(), points_image.len())?;

    let cw = select_control_points(points_world);
    let alphas = compute_barycentric(points_world, &cw, params.tol.eps)?;
    let m = build_m(&alphas, points_image, intrinsics);

    // null space of M from the eigenvectors of the 12x12 MᵀM, smallest eigenvalue first
    let mtm = m.transpose() * &m;
    let eig = mtm.symmetric_eigen();
    let mut order: Vec<usize> = (0..12).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let null4: [NullVector; 4] = std::array::from_fn(|i| {
        NullVector::from_iterator(eig.eigenvectors.column(order[i]).iter().copied())
    });

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);

    let candidates = [
        estimate_beta_approx_1(&l, &rho, params.tol.svd),
        estimate_beta_approx_2(&l, &rho, params.tol.svd),
        estimate_beta_approx_3(&l, &rho, params.tol.svd),
    ];

    let mut best: Option<PnPResult> = None;
    for betas in candidates.into_iter().flatten() {
        let betas = gauss_newton(&l, &rho, betas, params.tol.svd);
        let Ok((rotation, translation)) = pose_from_betas(&betas, &null4, &alphas, points_world)
        else {
            continue;
        };
        let err = rmse_px(points_world, points_image, &rotation, &translation, intrinsics);
        if best.as_ref().map_or(true, |b| err < b.reproj_rmse) {
            best = Some(PnPResult {
                rotation,
                translation,
                reproj_rmse: err,
            });
        }
    }

    best.ok_or_else(|| PnPError::SvdFailed("no beta approximation could be solved".to_string()))
}

/// Centroid plus the principal axes of the points, scaled by their spread.
fn select_control_points(points_world: &[Vector3<f64>]) -> [Vector3<f64>; 4] {
    let n = points_world.len() as f64;
    let c = compute_centroid(points_world);

    let cov = points_world
        .iter()
        .fold(Matrix3::zeros(), |acc, p| {
            let d = p - c;
            acc + d * d.transpose()
        })
        / n;

    let eig = cov.symmetric_eigen();
    let mut axes: Vec<(f64, Vector3<f64>)> = (0..3)
        .map(|i| {
            (
                eig.eigenvalues[i].max(0.0).sqrt(),
                eig.eigenvectors.column(i).into_owned(),
            )
        })
        .collect();
    axes.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut cw = [c; 4];
    for (i, (sigma, axis)) in axes.iter().enumerate() {
        cw[i + 1] = c + axis * *sigma;
    }
    cw
}

/// Barycentric coordinates of the points with respect to the control points.
///
/// For each point the weights sum to one and `pw = Σ_j α_j · cw_j`. A
/// pseudo-inverse is used when the control points are (nearly) coplanar.
fn compute_barycentric(
    points_world: &[Vector3<f64>],
    cw: &[Vector3<f64>; 4],
    eps: f64,
) -> Result<Vec<[f64; 4]>, PnPError> {
    let b = Matrix3::from_columns(&[cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]]);

    let b_inv = match b.try_inverse() {
        Some(inv) if b.determinant().abs() > eps => inv,
        _ => b
            .pseudo_inverse(eps)
            .map_err(|e| PnPError::SvdFailed(e.to_string()))?,
    };

    Ok(points_world
        .iter()
        .map(|p| {
            let lamb = b_inv * (p - cw[0]);
            [1.0 - lamb.sum(), lamb.x, lamb.y, lamb.z]
        })
        .collect())
}

/// The `2N × 12` design matrix `M` of EPnP, two rows per correspondence.
fn build_m(
    alphas: &[[f64; 4]],
    points_image: &[Vector2<f64>],
    intrinsics: &CameraIntrinsics,
) -> DMatrix<f64> {
    let (fu, fv, uc, vc) = (intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy);
    let mut m = DMatrix::<f64>::zeros(2 * alphas.len(), 12);

    for (i, (a, uv)) in alphas.iter().zip(points_image).enumerate() {
        let (row_x, row_y) = (2 * i, 2 * i + 1);
        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[(row_x, base)] = alpha * fu;
            m[(row_x, base + 2)] = alpha * (uc - uv.x);
            m[(row_y, base + 1)] = alpha * fv;
            m[(row_y, base + 2)] = alpha * (vc - uv.y);
        }
    }
    m
}

/// Build the 6×10 matrix `L` relating the beta products to `rho`.
fn build_l6x10(null4: &[NullVector; 4]) -> [[f64; 10]; 6] {
    let mut l = [[0.0; 10]; 6];

    for (row, &(a, b)) in l.iter_mut().zip(CP_PAIRS.iter()) {
        let d: [Vector3<f64>; 4] = std::array::from_fn(|k| {
            let v = &null4[k];
            Vector3::new(
                v[3 * a] - v[3 * b],
                v[3 * a + 1] - v[3 * b + 1],
                v[3 * a + 2] - v[3 * b + 2],
            )
        });

        *row = [
            d[0].dot(&d[0]),
            2.0 * d[0].dot(&d[1]),
            d[1].dot(&d[1]),
            2.0 * d[0].dot(&d[2]),
            2.0 * d[1].dot(&d[2]),
            d[2].dot(&d[2]),
            2.0 * d[0].dot(&d[3]),
            2.0 * d[1].dot(&d[3]),
            2.0 * d[2].dot(&d[3]),
            d[3].dot(&d[3]),
        ];
    }
    l
}

/// Compute the six squared distances (ρ vector) between the 4 control points.
fn rho_ctrlpts(cw: &[Vector3<f64>; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| (cw[i] - cw[j]).norm_squared())
}

/// Least-squares solve of `L[:, cols] · x = rho`.
fn solve_l_subset(
    l: &[[f64; 10]; 6],
    rho: &[f64; 6],
    cols: &[usize],
    tol_svd: f64,
) -> Option<DVector<f64>> {
    let l_sub = DMatrix::from_fn(6, cols.len(), |r, c| l[r][cols[c]]);
    let rho = DVector::from_column_slice(rho);
    l_sub.svd(true, true).solve(&rho, tol_svd).ok()
}

// betas10 = [B11 B12 B22 B13 B23 B33 B14 B24 B34 B44]

/// Four-beta approximation from `[B11 B12 B13 B14]`.
fn estimate_beta_approx_1(l: &[[f64; 10]; 6], rho: &[f64; 6], tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 3, 6], tol)?;
    if x[0].abs() <= tol {
        return None;
    }
    let (b0, sign) = if x[0] < 0.0 {
        ((-x[0]).sqrt(), -1.0)
    } else {
        (x[0].sqrt(), 1.0)
    };
    Some([b0, sign * x[1] / b0, sign * x[2] / b0, sign * x[3] / b0])
}

/// Two-beta approximation from `[B11 B12 B22]`.
fn estimate_beta_approx_2(l: &[[f64; 10]; 6], rho: &[f64; 6], tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 2], tol)?;
    let (b0, b1) = first_two_betas(&x);
    Some([b0, b1, 0.0, 0.0])
}

/// Three-beta approximation from `[B11 B12 B22 B13 B23]`.
fn estimate_beta_approx_3(l: &[[f64; 10]; 6], rho: &[f64; 6], tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 2, 3, 4], tol)?;
    let (b0, b1) = first_two_betas(&x);
    if b0.abs() <= tol {
        return None;
    }
    Some([b0, b1, x[3] / b0, 0.0])
}

fn first_two_betas(x: &DVector<f64>) -> (f64, f64) {
    let (mut b0, b1) = if x[0] < 0.0 {
        ((-x[0]).sqrt(), if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 })
    } else {
        (x[0].sqrt(), if x[2] > 0.0 { x[2].sqrt() } else { 0.0 })
    };
    if x[1] < 0.0 {
        b0 = -b0;
    }
    (b0, b1)
}

/// Refine the betas by Gauss-Newton on the control point distances.
fn gauss_newton(l: &[[f64; 10]; 6], rho: &[f64; 6], betas: [f64; 4], tol: f64) -> [f64; 4] {
    let mut b = betas;
    for _ in 0..GAUSS_NEWTON_ITERATIONS {
        let mut a = DMatrix::<f64>::zeros(6, 4);
        let mut residual = DVector::<f64>::zeros(6);
        let products = [
            b[0] * b[0],
            b[0] * b[1],
            b[1] * b[1],
            b[0] * b[2],
            b[1] * b[2],
            b[2] * b[2],
            b[0] * b[3],
            b[1] * b[3],
            b[2] * b[3],
            b[3] * b[3],
        ];

        for (i, row) in l.iter().enumerate() {
            a[(i, 0)] = 2.0 * row[0] * b[0] + row[1] * b[1] + row[3] * b[2] + row[6] * b[3];
            a[(i, 1)] = row[1] * b[0] + 2.0 * row[2] * b[1] + row[4] * b[2] + row[7] * b[3];
            a[(i, 2)] = row[3] * b[0] + row[4] * b[1] + 2.0 * row[5] * b[2] + row[8] * b[3];
            a[(i, 3)] = row[6] * b[0] + row[7] * b[1] + row[8] * b[2] + 2.0 * row[9] * b[3];
            residual[i] = rho[i] - row.iter().zip(&products).map(|(l, p)| l * p).sum::<f64>();
        }

        let Ok(delta) = a.svd(true, true).solve(&residual, tol) else {
            break;
        };
        for (bk, dk) in b.iter_mut().zip(delta.iter()) {
            *bk += dk;
        }
    }
    b
}

/// Recover the pose from the betas: camera-frame control points, then Kabsch.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &[NullVector; 4],
    alphas: &[[f64; 4]],
    points_world: &[Vector3<f64>],
) -> Result<(nalgebra::Rotation3<f64>, Vector3<f64>), PnPError> {
    let ccs_flat: NullVector = betas
        .iter()
        .zip(null4)
        .fold(NullVector::zeros(), |acc, (b, v)| acc + v * *b);
    let mut ccs: [Vector3<f64>; 4] = std::array::from_fn(|j| {
        Vector3::new(ccs_flat[3 * j], ccs_flat[3 * j + 1], ccs_flat[3 * j + 2])
    });

    let camera_point = |a: &[f64; 4], ccs: &[Vector3<f64>; 4]| {
        a.iter()
            .zip(ccs)
            .fold(Vector3::zeros(), |acc: Vector3<f64>, (w, c)| acc + c * *w)
    };

    if camera_point(&alphas[0], &ccs).z < 0.0 {
        for c in &mut ccs {
            *c = -*c;
        }
    }

    let pcs: Vec<Vector3<f64>> = alphas.iter().map(|a| camera_point(a, &ccs)).collect();
    kabsch(points_world, &pcs)
}
