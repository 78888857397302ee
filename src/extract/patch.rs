use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use imageproc::corners::{Corner, corners_fast9};
use log::debug;
use ndarray::Array2;

use crate::error::{BowError, BowResult};
use crate::extract::{Descriptors, FeatureExtractor};

/// 描述符窗口边长
const PATCH_SIZE: u32 = 20;
/// 窗口被划分为 4x4 个单元
const CELLS: u32 = 4;
const CELL_SIZE: u32 = PATCH_SIZE / CELLS;
/// 每个单元记录 Σdx, Σdy, Σ|dx|, Σ|dy|
pub const DESCRIPTOR_SIZE: usize = (CELLS * CELLS * 4) as usize;
/// 特征点到图片边缘的最小距离，保证窗口内每个像素都能计算中心差分
const MARGIN: u32 = PATCH_SIZE / 2 + 1;

#[derive(Debug, Clone)]
pub struct PatchParams {
    /// 特征点最大保留数量
    pub nfeatures: usize,
    /// FAST 角点检测阈值
    pub fast_threshold: u8,
    /// 图片最大尺寸 (宽, 高)，超过时等比缩放
    pub max_size: (u32, u32),
    /// 图片最大长宽比例，超过这个比例的图片，会按比例增加特征点数量
    pub max_aspect_ratio: f32,
    /// 最大特征点数量
    pub max_features: usize,
}

impl Default for PatchParams {
    fn default() -> Self {
        Self {
            nfeatures: 500,
            fast_threshold: 20,
            max_size: (1080, 768),
            max_aspect_ratio: 5.0,
            max_features: 1000,
        }
    }
}

/// 基于 FAST 角点和局部梯度直方图的特征提取器
#[derive(Debug, Clone, Default)]
pub struct PatchExtractor {
    params: PatchParams,
}

impl PatchExtractor {
    pub fn new(params: PatchParams) -> Self {
        Self { params }
    }

    fn get_nfeatures(&self, image: &GrayImage) -> usize {
        let (w, h) = image.dimensions();
        let (min, max) = (w.min(h).max(1), w.max(h));
        let aspect_ratio = max as f32 / min as f32;
        if aspect_ratio > self.params.max_aspect_ratio {
            let ratio = aspect_ratio / self.params.max_aspect_ratio - 1.;
            // 按 100 取整增加特征点数量
            let extra = (self.params.nfeatures as f32 * ratio / 100.).round() as usize * 100;
            return (self.params.nfeatures + extra).min(self.params.max_features);
        }
        self.params.nfeatures
    }

    fn adjust_image_size(&self, image: DynamicImage) -> GrayImage {
        let (mw, mh) = self.params.max_size;
        if image.width() > mw || image.height() > mh {
            image.resize(mw, mh, FilterType::Triangle).into_luma8()
        } else {
            image.into_luma8()
        }
    }

    pub fn detect_image(&self, image: &GrayImage) -> Descriptors {
        let (w, h) = image.dimensions();
        let mut corners: Vec<Corner> = corners_fast9(image, self.params.fast_threshold)
            .into_iter()
            .filter(|c| c.x >= MARGIN && c.y >= MARGIN && c.x + MARGIN <= w && c.y + MARGIN <= h)
            .collect();
        corners.sort_by(|a, b| b.score.total_cmp(&a.score).then((a.y, a.x).cmp(&(b.y, b.x))));
        corners.truncate(self.get_nfeatures(image));

        let mut descriptors = Array2::zeros((corners.len(), DESCRIPTOR_SIZE));
        for (mut row, corner) in descriptors.rows_mut().into_iter().zip(&corners) {
            let d = describe(image, corner.x, corner.y);
            row.iter_mut().zip(d).for_each(|(r, v)| *r = v);
        }
        debug!("{w}x{h} 的图片提取到 {} 个特征点", corners.len());
        descriptors
    }
}

/// 计算以 (cx, cy) 为中心的窗口的梯度直方图，结果经过 L2 归一化
fn describe(image: &GrayImage, cx: u32, cy: u32) -> [f32; DESCRIPTOR_SIZE] {
    let px = |x: u32, y: u32| image.get_pixel(x, y).0[0] as f32 / 255.0;
    let mut d = [0f32; DESCRIPTOR_SIZE];
    let (x0, y0) = (cx - PATCH_SIZE / 2, cy - PATCH_SIZE / 2);
    for i in 0..PATCH_SIZE {
        for j in 0..PATCH_SIZE {
            let (x, y) = (x0 + j, y0 + i);
            let dx = px(x + 1, y) - px(x - 1, y);
            let dy = px(x, y + 1) - px(x, y - 1);
            let cell = ((i / CELL_SIZE) * CELLS + j / CELL_SIZE) as usize * 4;
            d[cell] += dx;
            d[cell + 1] += dy;
            d[cell + 2] += dx.abs();
            d[cell + 3] += dy.abs();
        }
    }
    let norm = d.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        d.iter_mut().for_each(|v| *v /= norm);
    }
    d
}

impl FeatureExtractor for PatchExtractor {
    fn descriptor_size(&self) -> usize {
        DESCRIPTOR_SIZE
    }

    fn detect_file(&self, path: &Path) -> BowResult<Descriptors> {
        let image =
            image::open(path).map_err(|e| BowError::encoding(path.display().to_string(), e))?;
        Ok(self.detect_image(&self.adjust_image_size(image)))
    }

    fn detect_bytes(&self, bytes: &[u8]) -> BowResult<Descriptors> {
        let image =
            image::load_from_memory(bytes).map_err(|e| BowError::encoding("<memory>", e))?;
        Ok(self.detect_image(&self.adjust_image_size(image)))
    }
}
