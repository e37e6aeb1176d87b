use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use rgbd_image::{Image, ImageSize};
use rgbd_imgproc::features::{
    fast_feature_detector, match_nearest, DescriptorExtractor, FeatureDetector, OrbDetector,
    OrbExtractor,
};

fn random_blocks(size: ImageSize, seed: u64) -> Image<u8, 1> {
    let mut rng = StdRng::seed_from_u64(seed);
    let cells_x = size.width.div_ceil(8);
    let cells: Vec<u8> = (0..cells_x * size.height.div_ceil(8))
        .map(|_| rng.random_range(0..=255))
        .collect();
    let data = (0..size.height)
        .flat_map(|y| (0..size.width).map(move |x| (y, x)))
        .map(|(y, x)| cells[(y / 8) * cells_x + x / 8])
        .collect();
    Image::new(size, data).unwrap()
}

fn bench_features(c: &mut Criterion) {
    let mut group = c.benchmark_group("Features");

    for (width, height) in [(320, 240), (640, 480)] {
        let size = ImageSize { width, height };
        let img = random_blocks(size, 42);
        let parameter_string = format!("{width}x{height}");

        group.bench_with_input(
            BenchmarkId::new("fast_nms", &parameter_string),
            &img,
            |b, i| b.iter(|| black_box(fast_feature_detector(i, 10, 9, true)).unwrap()),
        );

        let detector = OrbDetector::default();
        group.bench_with_input(
            BenchmarkId::new("orb_detect", &parameter_string),
            &img,
            |b, i| b.iter(|| black_box(detector.detect(i, None)).unwrap()),
        );

        let extractor = OrbExtractor::default();
        let keypoints = detector.detect(&img, None).unwrap();
        let (_, descriptors) = extractor.describe(&img, &keypoints).unwrap();
        group.bench_with_input(
            BenchmarkId::new("orb_describe", &parameter_string),
            &img,
            |b, i| b.iter(|| black_box(extractor.describe(i, &keypoints)).unwrap()),
        );

        group.bench_with_input(
            BenchmarkId::new("match_nearest", &parameter_string),
            &descriptors,
            |b, d| b.iter(|| black_box(match_nearest(d, d, 64.0)).unwrap()),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_features);
criterion_main!(benches);
