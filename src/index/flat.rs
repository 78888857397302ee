use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::distance::{MAX_K, knn_l2};
use crate::error::{BowError, BowResult};
use crate::index::{Neighbor, NeighborIndex};

pub struct FlatIndex {
    data: Array2<f32>,
}

impl FlatIndex {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }
}

impl NeighborIndex for FlatIndex {
    fn knn_search(&self, queries: ArrayView2<f32>, k: usize) -> BowResult<Vec<Vec<Neighbor>>> {
        if k > MAX_K {
            return Err(BowError::Index(format!("k = {k} 超过了上限 {MAX_K}")));
        }
        if queries.nrows() > 0 && self.data.nrows() > 0 && queries.ncols() != self.data.ncols() {
            return Err(BowError::DimensionMismatch {
                expected: self.data.ncols(),
                actual: queries.ncols(),
            });
        }
        let data = self.data.view();
        Ok((0..queries.nrows())
            .into_par_iter()
            .map(|i| {
                knn_l2(queries.row(i), data, k)
                    .into_iter()
                    .map(|(id, distance)| Neighbor::new(id, distance))
                    .collect()
            })
            .collect())
    }

    fn ntotal(&self) -> usize {
        self.data.nrows()
    }
}
