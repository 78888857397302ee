use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{Array2, ArrayView2, Axis, concatenate, s};
use serde::{Deserialize, Serialize};

use crate::error::{BowError, BowResult};
use crate::index::{FlatIndex, HnswIndex, IndexKind, Neighbor, NeighborIndex};
use crate::manifest::ImageEntry;
use crate::store::{DescriptorStore, load_bincode, save_bincode};

/// 全局参考集合的名称
pub const GLOBAL: &str = "*";

/// 用于最近邻确认的参考描述符，保存为 matcher 文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStore {
    pub index_kind: IndexKind,
    pub descriptors: DescriptorStore,
}

/// 一组参考图片的描述符及其索引
pub struct ReferenceSet {
    pub label: String,
    pub images: Vec<ImageEntry>,
    /// 第 i 张图片的描述符位于 `offsets[i]..offsets[i + 1]` 行
    offsets: Vec<usize>,
    descriptors: Array2<f32>,
    index: Box<dyn NeighborIndex>,
}

impl ReferenceSet {
    fn assemble<F>(
        label: &str,
        members: Vec<(&ImageEntry, ArrayView2<f32>)>,
        descriptor_size: usize,
        make_index: F,
    ) -> BowResult<Self>
    where
        F: FnOnce(ArrayView2<f32>) -> BowResult<Box<dyn NeighborIndex>>,
    {
        let mut offsets = vec![0];
        let mut images = vec![];
        for (entry, block) in &members {
            images.push((*entry).clone());
            offsets.push(offsets[offsets.len() - 1] + block.nrows());
        }
        let views: Vec<_> = members.iter().map(|(_, b)| b.view()).collect();
        let descriptors = if views.is_empty() {
            Array2::zeros((0, descriptor_size))
        } else {
            concatenate(Axis(0), &views).map_err(|e| BowError::Index(e.to_string()))?
        };
        let index = make_index(descriptors.view())?;
        Ok(Self { label: label.to_string(), images, offsets, descriptors, index })
    }

    /// 描述符数量
    pub fn len(&self) -> usize {
        self.descriptors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.nrows() == 0
    }

    /// 第 row 个描述符所属的图片序号
    pub fn image_of(&self, row: usize) -> usize {
        self.offsets.partition_point(|&o| o <= row).saturating_sub(1)
    }

    /// 第 row 个描述符所属的类别
    pub fn label_of(&self, row: usize) -> &str {
        &self.images[self.image_of(row)].label
    }

    pub fn image_descriptors(&self, image: usize) -> ArrayView2<'_, f32> {
        self.descriptors.slice(s![self.offsets[image]..self.offsets[image + 1], ..])
    }

    pub fn knn_search(&self, queries: ArrayView2<f32>, k: usize) -> BowResult<Vec<Vec<Neighbor>>> {
        self.index.knn_search(queries, k)
    }
}

/// 加载到内存中的所有参考集合
pub struct ReferenceSets {
    pub index_kind: IndexKind,
    pub descriptor_size: usize,
    per_class: BTreeMap<String, ReferenceSet>,
    global: ReferenceSet,
}

impl ReferenceSets {
    /// 返回类别 label 的参考集合，集合不存在或为空时返回 `EmptyReferenceSet`
    pub fn get(&self, label: &str) -> BowResult<&ReferenceSet> {
        match self.per_class.get(label) {
            Some(set) if !set.is_empty() => Ok(set),
            _ => Err(BowError::EmptyReferenceSet(label.to_string())),
        }
    }

    pub fn global(&self) -> BowResult<&ReferenceSet> {
        if self.global.is_empty() {
            return Err(BowError::EmptyReferenceSet(GLOBAL.to_string()));
        }
        Ok(&self.global)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.per_class.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.per_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_class.is_empty()
    }
}

impl ReferenceStore {
    pub fn new(index_kind: IndexKind, descriptors: DescriptorStore) -> Self {
        Self { index_kind, descriptors }
    }

    /// 按类别分组的图片及其描述符
    fn groups(&self) -> BTreeMap<&str, Vec<(&ImageEntry, ArrayView2<'_, f32>)>> {
        let mut groups: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for (entry, block) in self.descriptors.iter() {
            groups.entry(entry.label.as_str()).or_default().push((entry, block));
        }
        groups
    }

    fn assemble<F>(&self, mut make_index: F) -> BowResult<ReferenceSets>
    where
        F: FnMut(&str, ArrayView2<f32>) -> BowResult<Box<dyn NeighborIndex>>,
    {
        let size = self.descriptors.descriptor_size;
        let mut per_class = BTreeMap::new();
        for (i, (label, members)) in self.groups().into_iter().enumerate() {
            let name = i.to_string();
            let set = ReferenceSet::assemble(label, members, size, |d| make_index(&name, d))?;
            debug!("类别 {label} 的参考集合包含 {} 个描述符", set.len());
            per_class.insert(label.to_string(), set);
        }
        let members = self.descriptors.iter().collect();
        let global = ReferenceSet::assemble(GLOBAL, members, size, |d| make_index("all", d))?;
        Ok(ReferenceSets { index_kind: self.index_kind, descriptor_size: size, per_class, global })
    }

    /// 在内存中构建所有参考集合的索引
    pub fn build(&self) -> BowResult<ReferenceSets> {
        let kind = self.index_kind;
        self.assemble(|_, d| Ok(new_index(kind, d)))
    }

    /// 保存 matcher 文件，索引类型为 HNSW 时同时在同一目录下保存 `<stem>.<n>.hnsw.*` 图文件
    ///
    /// 没有描述符的集合不保存图文件，加载时使用空的暴力索引
    pub fn save<P: AsRef<Path>>(&self, path: P) -> BowResult<()> {
        let path = path.as_ref();
        save_bincode(self, path)?;
        if self.index_kind == IndexKind::Hnsw {
            let (dir, stem) = graph_location(path);
            self.assemble(|name, d| {
                if d.nrows() == 0 {
                    return Ok(new_index(IndexKind::Flat, d));
                }
                let index = HnswIndex::build(d);
                index.save(&dir, &format!("{stem}.{name}"))?;
                Ok(Box::new(index))
            })?;
        }
        info!("保存参考描述符到 {}", path.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> BowResult<Self> {
        load_bincode(path)
    }

    /// 加载 matcher 文件并打开所有索引
    pub fn open<P: AsRef<Path>>(path: P) -> BowResult<ReferenceSets> {
        let path = path.as_ref();
        let store = Self::load(path)?;
        let sets = match store.index_kind {
            IndexKind::Flat => store.build()?,
            IndexKind::Hnsw => {
                let (dir, stem) = graph_location(path);
                let size = store.descriptors.descriptor_size;
                store.assemble(|name, d| {
                    if d.nrows() == 0 {
                        return Ok(new_index(IndexKind::Flat, d));
                    }
                    let index = HnswIndex::open(&dir, &format!("{stem}.{name}"), size)?;
                    Ok(Box::new(index))
                })?
            }
        };
        info!(
            "加载了 {} 个类别的参考描述符，共 {} 个，索引类型 {:?}",
            sets.len(),
            sets.global.len(),
            sets.index_kind
        );
        Ok(sets)
    }
}

fn new_index(kind: IndexKind, data: ArrayView2<f32>) -> Box<dyn NeighborIndex> {
    match kind {
        IndexKind::Flat => Box::new(FlatIndex::new(data.to_owned())),
        IndexKind::Hnsw => Box::new(HnswIndex::build(data)),
    }
}

fn graph_location(path: &Path) -> (PathBuf, String) {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    (dir, stem)
}
