use bowsvm::kmeans::{KMeansParams, kmeans};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// 生成有聚类模式的测试数据：64 维实数向量
fn generate_clustered_data(n: usize, num_clusters: usize) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(42);
    let d = 64;

    let centers: Vec<Vec<f32>> =
        (0..num_clusters).map(|_| (0..d).map(|_| rng.random::<f32>()).collect()).collect();

    // 在聚类中心附近生成数据
    Array2::from_shape_fn((n, d), |(i, j)| {
        centers[i % num_clusters][j] + (rng.random::<f32>() - 0.5) * 0.05
    })
}

fn bench_kmeans(c: &mut Criterion) {
    let mut group = c.benchmark_group("kmeans_64d");
    group.sample_size(10);

    let test_cases = black_box(vec![(5000, 100), (20000, 500), (50000, 1000)]);

    for (n, nc) in test_cases {
        let data = black_box(generate_clustered_data(n, nc / 2));
        let params = KMeansParams { clusters: nc, max_iter: 10, ..Default::default() };

        group.bench_function(format!("kmeans_{n}_{nc}"), |b| {
            b.iter(|| kmeans(data.view(), &params))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_kmeans);
criterion_main!(benches);
