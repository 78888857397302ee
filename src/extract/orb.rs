use std::path::Path;

use opencv::core::{self, KeyPoint, Mat, Vector};
use opencv::prelude::*;
use opencv::{features2d, imgcodecs, imgproc};

use crate::error::{BowError, BowResult};
use crate::extract::{Descriptors, FeatureExtractor, binary_to_real};

#[derive(Debug, Clone)]
pub struct OrbParams {
    pub nfeatures: i32,
    pub scale_factor: f32,
    pub nlevels: i32,
    pub fast_threshold: i32,
    /// 图片最大尺寸 (宽, 高)，超过时等比缩放
    pub max_size: (i32, i32),
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            nfeatures: 500,
            scale_factor: 1.2,
            nlevels: 8,
            fast_threshold: 20,
            max_size: (1080, 768),
        }
    }
}

/// OpenCV ORB 特征提取器，每个 256 位的描述符展开为 256 维 ±1 向量
#[derive(Debug, Clone, Default)]
pub struct OrbExtractor {
    params: OrbParams,
}

impl OrbExtractor {
    pub fn new(params: OrbParams) -> Self {
        Self { params }
    }

    fn adjust_image_size(&self, img: Mat) -> opencv::Result<Mat> {
        let (width, height) = self.params.max_size;
        if img.cols() <= width && img.rows() <= height {
            return Ok(img);
        }
        let (ow, oh) = (img.cols() as f64, img.rows() as f64);
        let scale = (height as f64 / oh).min(width as f64 / ow);
        let mut output = Mat::default();
        imgproc::resize(
            &img,
            &mut output,
            core::Size::default(),
            scale,
            scale,
            imgproc::InterpolationFlags::INTER_AREA as i32,
        )?;
        Ok(output)
    }

    fn detect_mat(&self, image: Mat) -> opencv::Result<Descriptors> {
        let image = self.adjust_image_size(image)?;
        // ORB 对象不能跨线程共享，每次调用单独创建
        let mut orb = features2d::ORB::create(
            self.params.nfeatures,
            self.params.scale_factor,
            self.params.nlevels,
            31,
            0,
            2,
            features2d::ORB_ScoreType::HARRIS_SCORE,
            31,
            self.params.fast_threshold,
        )?;
        let mut kps = Vector::<KeyPoint>::new();
        let mut des = Mat::default();
        let mask = Mat::default();
        orb.detect_and_compute(&image, &mask, &mut kps, &mut des, false)?;

        let mut rows = Vec::with_capacity(des.rows() as usize);
        for i in 0..des.rows() {
            let mut row = [0u8; 32];
            for (j, v) in row.iter_mut().enumerate() {
                *v = *des.at_2d::<u8>(i, j as i32)?;
            }
            rows.push(row);
        }
        Ok(binary_to_real(&rows))
    }
}

impl FeatureExtractor for OrbExtractor {
    fn descriptor_size(&self) -> usize {
        256
    }

    fn detect_file(&self, path: &Path) -> BowResult<Descriptors> {
        let name = path.display().to_string();
        let image = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_GRAYSCALE)
            .map_err(|e| BowError::encoding(&name, e))?;
        if image.empty() {
            return Err(BowError::encoding(&name, "无法解码图片"));
        }
        self.detect_mat(image).map_err(|e| BowError::encoding(&name, e))
    }

    fn detect_bytes(&self, bytes: &[u8]) -> BowResult<Descriptors> {
        let buf = Vector::<u8>::from_slice(bytes);
        let image = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_GRAYSCALE)
            .map_err(|e| BowError::encoding("<memory>", e))?;
        if image.empty() {
            return Err(BowError::encoding("<memory>", "无法解码图片"));
        }
        self.detect_mat(image).map_err(|e| BowError::encoding("<memory>", e))
    }
}
