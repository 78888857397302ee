use std::path::Path;

use hnsw_rs::prelude::*;
use log::debug;
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::distance::l2_squared;
use crate::error::{BowError, BowResult};
use crate::index::{Neighbor, NeighborIndex};

const MAX_NB_CONNECTION: usize = 16;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;

struct DistEuclid;

impl Distance<f32> for DistEuclid {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        l2_squared(ArrayView1::from(va), ArrayView1::from(vb)).sqrt()
    }
}

pub struct HnswIndex {
    hnsw: Hnsw<'static, f32, DistEuclid>,
    dim: usize,
}

impl HnswIndex {
    pub fn build(data: ArrayView2<f32>) -> Self {
        let (n, dim) = data.dim();
        let hnsw =
            Hnsw::<f32, _>::new(MAX_NB_CONNECTION, n.max(1), MAX_LAYER, EF_CONSTRUCTION, DistEuclid);
        (0..n).into_par_iter().for_each(|i| {
            let row = data.row(i).to_vec();
            hnsw.insert((row.as_slice(), i));
        });
        debug!("HNSW 构建完成，向量数量 = {n}");
        Self { hnsw, dim }
    }

    pub fn open<P: AsRef<Path>>(dir: P, basename: &str, dim: usize) -> BowResult<Self> {
        let dir = dir.as_ref();
        let reloader = HnswIo::new(dir, basename);
        // NOTE: reloader 加载的 HNSW 生命周期依赖于 reloader 的引用，所以需要使用 Box::leak 来延长生命周期
        let reloader = Box::leak(Box::new(reloader));
        let hnsw = reloader
            .load_hnsw_with_dist(DistEuclid)
            .map_err(|e| BowError::load(dir.join(basename), e))?;
        Ok(Self { hnsw, dim })
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P, basename: &str) -> BowResult<()> {
        self.hnsw.file_dump(dir.as_ref(), basename).map_err(|e| BowError::Index(e.to_string()))?;
        Ok(())
    }
}

impl NeighborIndex for HnswIndex {
    fn knn_search(&self, queries: ArrayView2<f32>, k: usize) -> BowResult<Vec<Vec<Neighbor>>> {
        if queries.nrows() > 0 && queries.ncols() != self.dim {
            return Err(BowError::DimensionMismatch { expected: self.dim, actual: queries.ncols() });
        }
        if self.ntotal() == 0 {
            return Ok(vec![vec![]; queries.nrows()]);
        }
        Ok((0..queries.nrows())
            .into_par_iter()
            .map(|i| {
                let q = queries.row(i).to_vec();
                self.hnsw
                    .search(&q, k, EF_SEARCH.max(k))
                    .into_iter()
                    .map(|n| Neighbor::new(n.d_id, n.distance))
                    .collect()
            })
            .collect())
    }

    fn ntotal(&self) -> usize {
        self.hnsw.get_nb_point()
    }
}
