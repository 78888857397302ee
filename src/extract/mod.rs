mod patch;
#[cfg(feature = "opencv")]
mod orb;

use std::path::Path;

use clap::ValueEnum;
use ndarray::Array2;

#[cfg(feature = "opencv")]
pub use orb::{OrbExtractor, OrbParams};
pub use patch::{PatchExtractor, PatchParams};

use crate::error::BowResult;

/// 一张图片的局部描述符，每行一个特征点
pub type Descriptors = Array2<f32>;

pub trait FeatureExtractor: Send + Sync {
    /// 描述符维度
    fn descriptor_size(&self) -> usize;

    /// 读取图片并计算描述符，图片无法解码时返回 `Encoding` 错误
    fn detect_file(&self, path: &Path) -> BowResult<Descriptors>;

    fn detect_bytes(&self, bytes: &[u8]) -> BowResult<Descriptors>;
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractorKind {
    /// FAST 角点 + 梯度直方图描述符
    #[default]
    Patch,
    /// OpenCV ORB，二进制描述符展开为 ±1 的实数向量
    #[cfg(feature = "opencv")]
    Orb,
}

/// 将二进制描述符的每一位展开为 ±1
pub fn binary_to_real<const N: usize>(descriptors: &[[u8; N]]) -> Array2<f32> {
    Array2::from_shape_fn((descriptors.len(), N * 8), |(i, j)| {
        if descriptors[i][j / 8] >> (7 - j % 8) & 1 == 1 { 1.0 } else { -1.0 }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_to_real() {
        let r = binary_to_real(&[[0b1000_0001u8, 0xff], [0x00, 0x0f]]);
        assert_eq!(r.dim(), (2, 16));
        assert_eq!(r[[0, 0]], 1.0);
        assert_eq!(r[[0, 1]], -1.0);
        assert_eq!(r[[0, 7]], 1.0);
        assert!(r.row(0).iter().skip(8).all(|&x| x == 1.0));
        assert_eq!(r.row(1).iter().filter(|&&x| x == 1.0).count(), 4);
    }
}
