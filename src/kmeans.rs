use indicatif::{ProgressBar, ProgressIterator};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::distance::{l2_squared, nearest_l2};
use crate::utils::pb_style;

/// k-means 聚类参数
#[derive(Debug, Clone)]
pub struct KMeansParams {
    /// 聚类中心数量
    pub clusters: usize,
    /// 最大迭代次数
    pub max_iter: usize,
    /// 随机数种子，相同种子和输入得到相同的聚类结果
    pub seed: u64,
    /// 距离和的相对变化低于该值时视为收敛
    pub tolerance: f32,
    /// 是否打印每一轮的详细信息
    pub verbose: bool,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self { clusters: 1000, max_iter: 20, seed: 42, tolerance: 1e-4, verbose: false }
    }
}

#[derive(Debug, Clone)]
pub struct KMeansState {
    /// 所有向量到其聚类中心的距离平方和
    pub distsum: f32,
    /// 聚类中心，每行一个
    pub centroids: Array2<f32>,
    /// 每个聚类中心包含的向量数量
    pub centroid_frequency: Vec<usize>,
    /// 实际迭代轮数
    pub iterations: usize,
}

pub fn imbalance_factor(hist: &[usize]) -> f32 {
    let (mut tot, mut uf) = (0.0, 0.0);
    for h in hist {
        let h = *h as f32;
        tot += h;
        uf += h.powf(2.0);
    }
    if tot == 0.0 {
        return 0.0;
    }
    uf * hist.len() as f32 / tot.powf(2.0)
}

/// 使用 Lloyd 算法对实数向量进行 k-means 聚类
///
/// 聚类中心数量大于向量数量时，会被截断为向量数量
pub fn kmeans(data: ArrayView2<f32>, params: &KMeansParams) -> KMeansState {
    let (n, d) = data.dim();
    let k = params.clusters.min(n);
    if k < params.clusters {
        warn!("向量数量 {n} 少于聚类中心数量 {}，聚类中心数量调整为 {k}", params.clusters);
    }
    if k == 0 {
        return KMeansState {
            distsum: 0.0,
            centroids: Array2::zeros((0, d)),
            centroid_frequency: vec![],
            iterations: 0,
        };
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = init_plusplus(data, k, &mut rng);
    info!("KMeans 初始化完成，{n} 组向量，中心点数量 = {k}");

    let mut distsum = f32::INFINITY;
    let mut centroid_frequency = vec![0; k];
    let mut iterations = 0;

    let pb = if params.verbose {
        ProgressBar::new(params.max_iter as u64).with_style(pb_style())
    } else {
        ProgressBar::hidden()
    };
    for nr in (0..params.max_iter).progress_with(pb.clone()) {
        iterations = nr + 1;
        let (assignments, new_distsum) = update_assignments(data, centroids.view());
        let (new_centroids, frequency) = update_centroids(data, &assignments, &centroids);
        centroids = new_centroids;
        centroid_frequency = frequency;

        let change = distsum - new_distsum;
        pb.set_message(format!(
            "第 {} 轮 - 不平衡度：{:.2} | 距离和：{:.4}",
            nr + 1,
            imbalance_factor(&centroid_frequency),
            new_distsum
        ));
        debug!("第 {} 轮 - 距离和变化：{:+.4}", nr + 1, -change);

        let converged = change.is_finite() && change <= params.tolerance * distsum.max(f32::EPSILON);
        distsum = new_distsum;
        if converged {
            break;
        }
    }
    pb.finish_and_clear();

    info!(
        "KMeans 完成，迭代 {iterations} 轮，距离和：{distsum:.4}，不平衡度：{:.2}",
        imbalance_factor(&centroid_frequency)
    );

    KMeansState { distsum, centroids, centroid_frequency, iterations }
}

/// k-means++ 初始化：每个新中心点按到已有中心点的距离平方加权抽样
fn init_plusplus(data: ArrayView2<f32>, k: usize, rng: &mut StdRng) -> Array2<f32> {
    let (n, d) = data.dim();
    let mut centroids = Array2::zeros((k, d));
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    let mut min_dist: Vec<f32> = (0..n).map(|i| l2_squared(data.row(i), data.row(first))).collect();

    for c in 1..k {
        let total: f32 = min_dist.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.random::<f32>() * total;
            let mut chosen = n - 1;
            for (i, &w) in min_dist.iter().enumerate() {
                if target < w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // 所有向量都已和中心点重合
            rng.random_range(0..n)
        };
        centroids.row_mut(c).assign(&data.row(chosen));
        let centroid = data.row(chosen);
        min_dist.par_iter_mut().enumerate().for_each(|(i, m)| {
            let d = l2_squared(data.row(i), centroid);
            if d < *m {
                *m = d;
            }
        });
    }
    centroids
}

/// 将每个点分配给最近的聚类中心，并返回聚类中心的序号和总距离
fn update_assignments(data: ArrayView2<f32>, centroids: ArrayView2<f32>) -> (Vec<usize>, f32) {
    let r: Vec<(usize, f32)> = (0..data.nrows())
        .into_par_iter()
        .map(|i| nearest_l2(data.row(i), centroids).unwrap_or((0, 0.0)))
        .collect();
    let distsum = r.iter().map(|(_, d)| d).sum();
    (r.into_iter().map(|(i, _)| i).collect(), distsum)
}

/// 根据分配结果重新计算聚类中心，空的聚类保留原来的中心
fn update_centroids(
    data: ArrayView2<f32>,
    assignments: &[usize],
    old: &Array2<f32>,
) -> (Array2<f32>, Vec<usize>) {
    let k = old.nrows();
    let mut sums = Array2::<f32>::zeros(old.raw_dim());
    let mut frequency = vec![0; k];
    for (row, &a) in data.axis_iter(Axis(0)).zip(assignments) {
        let mut sum = sums.row_mut(a);
        sum += &row;
        frequency[a] += 1;
    }
    for (c, &cnt) in frequency.iter().enumerate() {
        if cnt == 0 {
            sums.row_mut(c).assign(&old.row(c));
        } else {
            sums.row_mut(c).mapv_inplace(|v| v / cnt as f32);
        }
    }
    (sums, frequency)
}
