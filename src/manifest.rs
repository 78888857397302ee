use std::path::{Path, PathBuf};

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{BowError, BowResult};

pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png,bmp,gif,webp,tif,tiff";

/// 一张带类别的图片
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageEntry {
    /// 图片唯一 ID，格式为 `类别/文件名`
    pub image_id: String,
    pub label: String,
    pub path: PathBuf,
}

impl ImageEntry {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let label = label.into();
        let path = path.into();
        let name = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let image_id = if label.is_empty() { name } else { format!("{label}/{name}") };
        Self { image_id, label, path }
    }
}

/// 一张待分类的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub id: String,
    pub path: PathBuf,
    /// 期望的类别，用于统计错误率
    pub expected: Option<String>,
}

impl Query {
    pub fn new(path: impl Into<PathBuf>, expected: Option<String>) -> Self {
        let path = path.into();
        let name = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let id = match &expected {
            Some(label) => format!("{label}/{name}"),
            None => name,
        };
        Self { id, path, expected }
    }
}

impl From<ImageEntry> for Query {
    fn from(entry: ImageEntry) -> Self {
        let expected = Some(entry.label).filter(|l| !l.is_empty());
        Self { id: entry.image_id, path: entry.path, expected }
    }
}

/// 按后缀名扫描图片目录
///
/// 目录结构为 `<dir>/<类别>/<文件>`，类别即子目录名
#[derive(Debug, Clone)]
pub struct ImageScanner {
    suffix: Regex,
}

impl ImageScanner {
    /// suffix 为逗号分隔的后缀名列表，如 `jpg,png`
    pub fn new(suffix: &str) -> BowResult<Self> {
        let pattern = format!("(?i)^({})$", suffix.replace(',', "|"));
        let suffix = Regex::new(&pattern)
            .map_err(|e| BowError::Configuration(format!("无效的后缀名 {suffix}: {e}")))?;
        Ok(Self { suffix })
    }

    fn accept(&self, path: &Path) -> bool {
        path.extension().map(|s| self.suffix.is_match(&s.to_string_lossy())) == Some(true)
    }

    fn walk(&self, dir: &Path, min_depth: usize) -> BowResult<Vec<ImageEntry>> {
        if !dir.is_dir() {
            return Err(BowError::load(dir, "不是一个目录"));
        }
        let mut entries = vec![];
        for entry in WalkDir::new(dir).min_depth(min_depth).max_depth(2).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("跳过 {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.accept(entry.path()) {
                continue;
            }
            let label = if entry.depth() == 2 {
                entry
                    .path()
                    .parent()
                    .and_then(|p| p.file_name())
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                String::new()
            };
            entries.push(ImageEntry::new(label, entry.into_path()));
        }
        debug!("在 {} 中找到 {} 张图片", dir.display(), entries.len());
        Ok(entries)
    }

    /// 扫描训练集，只接受位于类别子目录中的图片
    pub fn scan_labeled<P: AsRef<Path>>(&self, dir: P) -> BowResult<Vec<ImageEntry>> {
        self.walk(dir.as_ref(), 2)
    }

    /// 扫描测试集，子目录中的图片以子目录名作为期望类别，根目录中的图片没有期望类别
    pub fn scan_queries<P: AsRef<Path>>(&self, dir: P) -> BowResult<Vec<Query>> {
        Ok(self.walk(dir.as_ref(), 1)?.into_iter().map(Query::from).collect())
    }
}

impl Default for ImageScanner {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX).expect("default suffix must be a valid regex")
    }
}
