mod flat;
mod hnsw;

use clap::ValueEnum;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;

use crate::error::BowResult;

/// 最近邻搜索结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 被搜索向量在索引中的行号
    pub id: usize,
    /// 欧氏距离
    pub distance: f32,
}

impl Neighbor {
    pub fn new(id: usize, distance: f32) -> Self {
        Self { id, distance }
    }
}

/// 最近邻索引的类型
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexKind {
    /// 暴力搜索，结果精确
    #[default]
    Flat,
    /// HNSW 图，结果近似
    Hnsw,
}

pub trait NeighborIndex: Send + Sync {
    /// 对 queries 的每一行返回最多 k 个最近邻居，按距离从小到大排列
    fn knn_search(&self, queries: ArrayView2<f32>, k: usize) -> BowResult<Vec<Vec<Neighbor>>>;

    /// 索引中的向量数量
    fn ntotal(&self) -> usize;
}
