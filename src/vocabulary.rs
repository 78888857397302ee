use std::path::Path;

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::nearest_l2;
use crate::error::{BowError, BowResult};
use crate::store::{load_bincode, save_bincode};

/// 长度为词汇量 K 的词频向量，元素之和为 1，输入为空时全为 0
pub type BowDescriptor = Vec<f32>;

/// 视觉词汇表，每一行是一个视觉单词（聚类中心）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    words: Array2<f32>,
}

impl Vocabulary {
    pub fn new(words: Array2<f32>) -> Self {
        Self { words }
    }

    pub fn words(&self) -> ArrayView2<'_, f32> {
        self.words.view()
    }

    /// 单词数量 K
    pub fn len(&self) -> usize {
        self.words.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.words.nrows() == 0
    }

    /// 描述符维度 D
    pub fn descriptor_size(&self) -> usize {
        self.words.ncols()
    }

    fn check(&self, descriptors: ArrayView2<f32>) -> BowResult<()> {
        if self.is_empty() {
            return Err(BowError::Configuration("词汇表为空".to_string()));
        }
        if descriptors.nrows() > 0 && descriptors.ncols() != self.descriptor_size() {
            return Err(BowError::DimensionMismatch {
                expected: self.descriptor_size(),
                actual: descriptors.ncols(),
            });
        }
        Ok(())
    }

    /// 返回每个描述符最近的单词序号
    pub fn quantize(&self, descriptors: ArrayView2<f32>) -> BowResult<Vec<usize>> {
        self.check(descriptors)?;
        let words = self.words.view();
        Ok((0..descriptors.nrows())
            .into_par_iter()
            .map(|i| nearest_l2(descriptors.row(i), words).map(|(w, _)| w).unwrap_or(0))
            .collect())
    }

    /// 将一组描述符编码为 L1 归一化的词频向量
    pub fn encode(&self, descriptors: ArrayView2<f32>) -> BowResult<BowDescriptor> {
        let words = self.quantize(descriptors)?;
        let mut counts = vec![0u32; self.len()];
        for w in &words {
            counts[*w] += 1;
        }
        if words.is_empty() {
            return Ok(vec![0.0; self.len()]);
        }
        let total = words.len() as f32;
        Ok(counts.into_iter().map(|c| c as f32 / total).collect())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> BowResult<Self> {
        let path = path.as_ref();
        let vocabulary: Self = load_bincode(path)?;
        if vocabulary.is_empty() {
            return Err(BowError::load(path, "词汇表为空"));
        }
        Ok(vocabulary)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> BowResult<()> {
        save_bincode(self, path)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn vocabulary() -> Vocabulary {
        Vocabulary::new(array![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]])
    }

    #[test]
    fn test_encode_example() {
        let des = array![[0.1, 0.2], [0.3, -0.1], [-0.2, 0.0], [0.5, 9.5]];
        let bow = vocabulary().encode(des.view()).unwrap();
        assert_eq!(bow, vec![0.75, 0.0, 0.25, 0.0]);
    }

    #[test]
    fn test_encode_normalized() {
        let des = array![[9.0, 1.0], [1.0, 1.0], [8.0, 8.0], [2.0, 7.0], [6.0, 6.0], [0.0, 3.0]];
        let bow = vocabulary().encode(des.view()).unwrap();
        let sum: f32 = bow.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(bow.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn test_encode_empty() {
        let bow = vocabulary().encode(Array2::zeros((0, 2)).view()).unwrap();
        assert_eq!(bow, vec![0.0; 4]);
        let bow = vocabulary().encode(Array2::zeros((0, 0)).view()).unwrap();
        assert_eq!(bow, vec![0.0; 4]);
    }

    #[test]
    fn test_encode_idempotent() {
        let des = array![[1.0, 2.0], [9.0, 9.0], [4.9, 5.1]];
        let v = vocabulary();
        let a = v.encode(des.view()).unwrap();
        let b = v.encode(des.view()).unwrap();
        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_encode_dimension_mismatch() {
        let des = array![[1.0, 2.0, 3.0]];
        let err = vocabulary().encode(des.view()).unwrap_err();
        assert!(matches!(err, BowError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocabulary.bin");
        vocabulary().save(&path).unwrap();
        assert_eq!(Vocabulary::load(&path).unwrap(), vocabulary());
    }

    #[test]
    fn test_load_empty_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocabulary.bin");
        Vocabulary::new(Array2::zeros((0, 2))).save(&path).unwrap();
        assert!(Vocabulary::load(&path).is_err());
    }
}
