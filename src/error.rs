use std::path::PathBuf;

use thiserror::Error;

pub type BowResult<T> = std::result::Result<T, BowError>;

#[derive(Error, Debug)]
pub enum BowError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("序列化错误: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无法读取 {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("图片 {image} 特征提取失败: {reason}")]
    Encoding { image: String, reason: String },
    #[error("没有已训练的分类器")]
    NoTrainedClasses,
    #[error("类别 {0} 没有正样本")]
    InsufficientTrainingData(String),
    #[error("维度不一致: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("类别 {0} 的参考描述符为空")]
    EmptyReferenceSet(String),
    #[error("最近邻索引错误: {0}")]
    Index(String),
}

impl BowError {
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Load { path: path.into(), reason: reason.to_string() }
    }

    pub fn encoding(image: impl Into<String>, reason: impl ToString) -> Self {
        Self::Encoding { image: image.into(), reason: reason.to_string() }
    }
}
