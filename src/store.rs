use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::debug;
use ndarray::{Array2, ArrayView2, Axis, concatenate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BowError, BowResult};
use crate::manifest::ImageEntry;

pub fn save_bincode<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> BowResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, value)?;
    debug!("写入 {}", path.display());
    Ok(())
}

/// 读取 bincode 文件，失败时返回带有文件路径的错误
pub fn load_bincode<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> BowResult<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| BowError::load(path, e))?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|e| BowError::load(path, e))
}

/// 每张图片的局部描述符
///
/// `entries[i]` 对应 `blocks[i]`，每个 block 的列数都等于 `descriptor_size`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorStore {
    pub descriptor_size: usize,
    pub entries: Vec<ImageEntry>,
    pub blocks: Vec<Array2<f32>>,
}

impl DescriptorStore {
    pub fn new(descriptor_size: usize) -> Self {
        Self { descriptor_size, entries: vec![], blocks: vec![] }
    }

    pub fn push(&mut self, entry: ImageEntry, block: Array2<f32>) -> BowResult<()> {
        if block.nrows() > 0 && block.ncols() != self.descriptor_size {
            return Err(BowError::DimensionMismatch {
                expected: self.descriptor_size,
                actual: block.ncols(),
            });
        }
        let block =
            if block.nrows() == 0 { Array2::zeros((0, self.descriptor_size)) } else { block };
        self.entries.push(entry);
        self.blocks.push(block);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有描述符的数量
    pub fn total_descriptors(&self) -> usize {
        self.blocks.iter().map(|b| b.nrows()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ImageEntry, ArrayView2<'_, f32>)> {
        self.entries.iter().zip(self.blocks.iter().map(|b| b.view()))
    }

    /// 将所有图片的描述符按顺序拼接为一个矩阵
    pub fn stacked(&self) -> Array2<f32> {
        let views: Vec<_> = self.blocks.iter().map(|b| b.view()).collect();
        if views.is_empty() {
            return Array2::zeros((0, self.descriptor_size));
        }
        concatenate(Axis(0), &views).unwrap_or_else(|_| Array2::zeros((0, self.descriptor_size)))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> BowResult<Self> {
        load_bincode(path)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> BowResult<()> {
        save_bincode(self, path)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn entry(label: &str, name: &str) -> ImageEntry {
        ImageEntry::new(label, format!("{label}/{name}"))
    }

    #[test]
    fn test_push_and_stack() {
        let mut store = DescriptorStore::new(2);
        store.push(entry("cat", "a.png"), array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        store.push(entry("dog", "b.png"), Array2::zeros((0, 0))).unwrap();
        store.push(entry("dog", "c.png"), array![[5.0, 6.0]]).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.total_descriptors(), 3);
        assert_eq!(store.blocks[1].dim(), (0, 2));
        assert_eq!(store.stacked(), array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    }

    #[test]
    fn test_push_dimension_mismatch() {
        let mut store = DescriptorStore::new(3);
        let err = store.push(entry("cat", "a.png"), array![[1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, BowError::DimensionMismatch { expected: 3, actual: 2 }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("descriptors.bin");
        let mut store = DescriptorStore::new(2);
        store.push(entry("cat", "a.png"), array![[1.0, 2.0]]).unwrap();
        store.save(&path).unwrap();
        assert_eq!(DescriptorStore::load(&path).unwrap(), store);
    }

    #[test]
    fn test_load_missing_names_path() {
        let err = DescriptorStore::load("/nonexistent/descriptors.bin").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/descriptors.bin"));
    }
}
