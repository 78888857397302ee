use ndarray::{ArrayView1, ArrayView2};

/// 最多支持的近邻数量
pub const MAX_K: usize = 8;

#[inline(always)]
pub fn l2_squared(va: ArrayView1<f32>, vb: ArrayView1<f32>) -> f32 {
    va.iter().zip(vb.iter()).map(|(a, b)| (a - b) * (a - b)).sum()
}

/// 返回 vb 中离 va 最近的一行的序号及其欧氏距离的平方
///
/// vb 为空时返回 None，距离相同时取序号较小的一行
pub fn nearest_l2(va: ArrayView1<f32>, vb: ArrayView2<f32>) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, row) in vb.rows().into_iter().enumerate() {
        let d = l2_squared(va, row);
        match best {
            Some((_, bd)) if d >= bd => {}
            _ => best = Some((i, d)),
        }
    }
    best
}

/// 计算向量 va 和 vb 中每一行的欧氏距离，并返回距离最小的 k 个 (序号, 距离)
///
/// 参数：
/// - va: 查询向量
/// - vb: 若干行向量
/// - k: 返回的最近邻居数量
pub fn knn_l2(va: ArrayView1<f32>, vb: ArrayView2<f32>, k: usize) -> Vec<(usize, f32)> {
    assert!(k <= MAX_K, "k must be less than 8");
    let mut dis = [f32::INFINITY; MAX_K];
    let mut idx = [0; MAX_K];
    for (i, row) in vb.rows().into_iter().enumerate() {
        let d = l2_squared(va, row);
        if k == 0 || d >= dis[0] {
            continue;
        }
        // 维护一个长度为 K 的单调递减数组，最大的元素在前面
        for j in (0..k).rev() {
            if d < dis[j] {
                dis[..=j].rotate_left(1);
                dis[j] = d;
                idx[..=j].rotate_left(1);
                idx[j] = i;
                break;
            }
        }
    }
    idx.into_iter()
        .zip(dis)
        .take(k)
        .filter(|(_, d)| d.is_finite())
        .rev()
        .map(|(i, d)| (i, d.sqrt()))
        .collect()
}
