use bowsvm::Vocabulary;
use bowsvm::extract::{FeatureExtractor, PatchExtractor};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_matrix(rng: &mut StdRng, n: usize, d: usize) -> Array2<f32> {
    Array2::from_shape_fn((n, d), |_| rng.random::<f32>())
}

fn noise_png(rng: &mut StdRng, w: u32, h: u32) -> Vec<u8> {
    let image = GrayImage::from_fn(w, h, |_, _| Luma([rng.random::<u8>()]));
    let mut buf = std::io::Cursor::new(vec![]);
    DynamicImage::ImageLuma8(image).write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn bench_encode(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let mut group = c.benchmark_group("encode");

    for k in [100, 1000] {
        let vocabulary = Vocabulary::new(random_matrix(&mut rng, k, 64));
        let descriptors = black_box(random_matrix(&mut rng, 500, 64));
        group.bench_function(format!("bow_500x64_k{k}"), |b| {
            b.iter(|| vocabulary.encode(descriptors.view()).unwrap())
        });
    }

    let extractor = PatchExtractor::default();
    let image = black_box(noise_png(&mut rng, 640, 480));
    group.bench_function("patch_640x480", |b| b.iter(|| extractor.detect_bytes(&image).unwrap()));

    group.finish();
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
