use std::path::PathBuf;

use argh::FromArgs;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rgbd::image::ImageSize;
use rgbd::k3d::completion::{complete_depth, CompletionPolicy};
use rgbd::k3d::projection::project_cloud_to_image;
use rgbd::k3d::transforms::{difference, difference_between, exceeds_threshold};
use rgbd::k3d::{CameraIntrinsics, PointCloud, Transform3D};
use rgbd::odometry::diagnostics::RecordingSink;
use rgbd::odometry::{EstimatorConfig, PoseEstimator};

/// Render a textured scene from two viewpoints and recover the camera motion between them
#[derive(Debug, FromArgs)]
struct Args {
    /// path to a JSON estimator configuration
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// query camera translation in meters as x,y,z
    #[argh(option, default = "[0.05, -0.02, 0.08]", from_str_fn(parse_triplet))]
    translation: [f64; 3],

    /// query camera rotation in radians as roll,pitch,yaw
    #[argh(option, default = "[0.01, -0.03, 0.02]", from_str_fn(parse_triplet))]
    rotation: [f64; 3],

    /// seed of the scene texture
    #[argh(option, short = 's', default = "42")]
    seed: u64,

    /// side of the depth completion window, odd
    #[argh(option, short = 'w', default = "5")]
    window: usize,

    /// fill holes with the nearest neighbour instead of the mean
    #[argh(switch, short = 'n')]
    nearest: bool,
}

fn parse_triplet(value: &str) -> Result<[f64; 3], String> {
    let parts = value
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("{v}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    parts
        .try_into()
        .map_err(|_| format!("expected three comma separated values, got `{value}`"))
}

const IMAGE_SIZE: ImageSize = ImageSize {
    width: 640,
    height: 480,
};
const SURFACE_STEP: f64 = 0.004;
const CELL_SIZE: f64 = 0.05;

/// A dense colored cloud sampled on two planes meeting in a ridge, `z = 2 + |x| / 2`.
fn v_shaped_cloud(seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let cells_x = (3.6 / CELL_SIZE).ceil() as usize;
    let cells_y = (2.8 / CELL_SIZE).ceil() as usize;
    let palette: Vec<[u8; 3]> = (0..cells_x * cells_y).map(|_| rng.random()).collect();

    let nx = (3.6 / SURFACE_STEP) as usize;
    let ny = (2.8 / SURFACE_STEP) as usize;
    let mut points = Vec::with_capacity(nx * ny);
    let mut colors = Vec::with_capacity(nx * ny);
    for iy in 0..ny {
        let y = -1.4 + iy as f64 * SURFACE_STEP;
        let cy = ((y + 1.4) / CELL_SIZE) as usize;
        for ix in 0..nx {
            let x = -1.8 + ix as f64 * SURFACE_STEP;
            let cx = ((x + 1.8) / CELL_SIZE) as usize;
            points.push([x, y, 2.0 + 0.5 * x.abs()]);
            colors.push(palette[(cy * cells_x + cx).min(palette.len() - 1)]);
        }
    }
    PointCloud::new(points, Some(colors))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => EstimatorConfig {
            min_inliers: 50,
            profile: true,
            ..Default::default()
        },
    };
    let policy = if args.nearest {
        CompletionPolicy::Nearest
    } else {
        CompletionPolicy::Mean
    };

    let intrinsics = CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5)?;
    let cloud = v_shaped_cloud(args.seed);
    log::info!("scene cloud with {} points", cloud.len());

    let motion = Transform3D::from_xyz_rpy(args.translation, args.rotation);
    let (dist, angle) = difference(&motion);
    println!("true motion: {dist:.4} m, {:.3} deg", angle.to_degrees());

    // the cloud frame is the reference camera frame
    let render = |camera_pose: &Transform3D| -> Result<_, Box<dyn std::error::Error>> {
        let (color, depth) =
            project_cloud_to_image(&cloud, &camera_pose.inverse(), &intrinsics, IMAGE_SIZE)?;
        Ok(complete_depth(&color, &depth, args.window, policy)?)
    };
    let (reference_color, reference_depth) = render(&Transform3D::identity())?;
    let (query_color, _) = render(&motion)?;

    let estimator = PoseEstimator::new(config, intrinsics)?;
    let mut sink = RecordingSink::default();
    let estimate = estimator.estimate(
        &reference_color,
        &reference_depth,
        &query_color,
        Some(&mut sink),
    )?;

    if !estimate.is_valid() {
        println!("no pose found from {} candidates", estimate.num_candidates);
        return Ok(());
    }

    let (xyz, rpy) = estimate.transform.to_xyz_rpy();
    println!(
        "estimated motion: xyz {xyz:.4?} rpy {rpy:.4?} with {} of {} inliers, rmse {:.3} px",
        estimate.num_inliers, estimate.num_candidates, estimate.reprojection_rmse
    );

    let (dist_err, angle_err) = difference_between(&estimate.transform, &motion);
    println!(
        "error: {:.2} mm, {:.4} deg",
        dist_err * 1e3,
        angle_err.to_degrees()
    );
    println!(
        "keyframe needed (0.1 m / 10 deg): {}",
        exceeds_threshold(&estimate.transform, 0.1, 10f64.to_radians())
    );

    if let Some(timings) = estimate.timings {
        println!("total time: {:.2} ms", timings.total().as_secs_f64() * 1e3);
    }
    println!("{} overlays rendered", sink.overlays.len());

    Ok(())
}
