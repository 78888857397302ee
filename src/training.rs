use std::collections::BTreeMap;

use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::error::{BowError, BowResult};
use crate::extract::FeatureExtractor;
use crate::index::IndexKind;
use crate::kmeans::{KMeansParams, kmeans};
use crate::manifest::ImageEntry;
use crate::reference::ReferenceStore;
use crate::store::DescriptorStore;
use crate::svm::{ClassModel, SvmParams};
use crate::utils::pb_style;
use crate::vocabulary::{BowDescriptor, Vocabulary};

/// 并行计算所有图片的描述符，无法读取的图片会被跳过
pub fn extract_descriptors(
    extractor: &dyn FeatureExtractor,
    entries: &[ImageEntry],
) -> BowResult<DescriptorStore> {
    let pb = ProgressBar::new(entries.len() as u64).with_style(pb_style());
    let results: Vec<_> = entries
        .par_iter()
        .progress_with(pb.clone())
        .map(|entry| extractor.detect_file(&entry.path))
        .collect();
    pb.finish_and_clear();

    let mut store = DescriptorStore::new(extractor.descriptor_size());
    let mut failed = 0;
    for (entry, result) in entries.iter().zip(results) {
        match result {
            Ok(descriptors) => store.push(entry.clone(), descriptors)?,
            Err(e) => {
                warn!("跳过 {}: {e}", entry.image_id);
                failed += 1;
            }
        }
    }
    info!(
        "计算了 {} 张图片的描述符，共 {} 个，失败 {failed} 张",
        store.len(),
        store.total_descriptors()
    );
    Ok(store)
}

/// 对所有描述符进行聚类，聚类中心即视觉单词
pub fn build_vocabulary(
    descriptors: ArrayView2<f32>,
    params: &KMeansParams,
) -> BowResult<Vocabulary> {
    if descriptors.nrows() == 0 {
        return Err(BowError::Configuration("没有可用于构建词汇表的描述符".to_string()));
    }
    let state = kmeans(descriptors, params);
    Ok(Vocabulary::new(state.centroids))
}

/// 计算每张图片的 BOW 描述符，按类别分组
pub fn compute_labeled_bows(
    store: &DescriptorStore,
    vocabulary: &Vocabulary,
) -> BowResult<BTreeMap<String, Vec<BowDescriptor>>> {
    let blocks: Vec<_> = store.iter().collect();
    let bows = blocks
        .par_iter()
        .map(|(entry, block)| Ok((entry.label.clone(), vocabulary.encode(*block)?)))
        .collect::<BowResult<Vec<_>>>()?;

    let mut labeled: BTreeMap<String, Vec<BowDescriptor>> = BTreeMap::new();
    for (label, bow) in bows {
        labeled.entry(label).or_default().push(bow);
    }
    Ok(labeled)
}

/// 为每个类别训练一对多分类器，正样本为该类别的 BOW 描述符，负样本为其它所有类别的
///
/// 没有正样本的类别会被跳过
pub fn train_all_classes(
    bows: &BTreeMap<String, Vec<BowDescriptor>>,
    params: &SvmParams,
) -> BowResult<BTreeMap<String, ClassModel>> {
    let classes: Vec<_> = bows.keys().collect();
    let pb = ProgressBar::new(classes.len() as u64).with_style(pb_style());
    let results: Vec<_> = classes
        .par_iter()
        .progress_with(pb.clone())
        .map(|&class| {
            let positives: Vec<&[f32]> = bows[class].iter().map(|b| b.as_slice()).collect();
            let negatives: Vec<&[f32]> = bows
                .iter()
                .filter(|(c, _)| *c != class)
                .flat_map(|(_, b)| b.iter().map(|b| b.as_slice()))
                .collect();
            (class, ClassModel::train(class, &positives, &negatives, params))
        })
        .collect();
    pb.finish_and_clear();

    let mut models = BTreeMap::new();
    for (class, result) in results {
        match result {
            Ok(model) => {
                models.insert(class.clone(), model);
            }
            Err(e @ BowError::InsufficientTrainingData(_)) => warn!("跳过类别 {class}: {e}"),
            Err(e) => return Err(e),
        }
    }
    info!("训练了 {} 个类别的分类器", models.len());
    Ok(models)
}

/// 保留每张图片的描述符，用于分类时的最近邻确认
pub fn build_reference_store(store: &DescriptorStore, index_kind: IndexKind) -> ReferenceStore {
    ReferenceStore::new(index_kind, store.clone())
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;

    fn store() -> DescriptorStore {
        let mut store = DescriptorStore::new(2);
        let cat = array![[0.0, 0.0], [0.1, 0.0], [0.0, 0.1]];
        let dog = array![[5.0, 5.0], [5.1, 5.0]];
        store.push(ImageEntry::new("cat", "cat/1.png"), cat.clone()).unwrap();
        store.push(ImageEntry::new("cat", "cat/2.png"), cat + 0.05).unwrap();
        store.push(ImageEntry::new("dog", "dog/1.png"), dog.clone()).unwrap();
        store.push(ImageEntry::new("dog", "dog/2.png"), dog - 0.05).unwrap();
        store
    }

    fn vocabulary() -> Vocabulary {
        Vocabulary::new(array![[0.0, 0.0], [5.0, 5.0]])
    }

    #[test]
    fn test_build_vocabulary() {
        let params = KMeansParams { clusters: 2, ..Default::default() };
        let vocabulary = build_vocabulary(store().stacked().view(), &params).unwrap();
        assert_eq!(vocabulary.len(), 2);
        assert_eq!(vocabulary.descriptor_size(), 2);
    }

    #[test]
    fn test_build_vocabulary_empty() {
        let err = build_vocabulary(Array2::zeros((0, 2)).view(), &KMeansParams::default());
        assert!(matches!(err, Err(BowError::Configuration(_))));
    }

    #[test]
    fn test_compute_labeled_bows() {
        let bows = compute_labeled_bows(&store(), &vocabulary()).unwrap();
        assert_eq!(bows.keys().collect::<Vec<_>>(), vec!["cat", "dog"]);
        assert_eq!(bows["cat"], vec![vec![1.0, 0.0], vec![1.0, 0.0]]);
        assert_eq!(bows["dog"], vec![vec![0.0, 1.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_train_all_classes() {
        let bows = compute_labeled_bows(&store(), &vocabulary()).unwrap();
        let models = train_all_classes(&bows, &SvmParams::default()).unwrap();
        assert_eq!(models.len(), 2);
        let cat = &models["cat"];
        assert!(cat.score(&[1.0, 0.0]).unwrap() < cat.score(&[0.0, 1.0]).unwrap());
        let dog = &models["dog"];
        assert!(dog.score(&[0.0, 1.0]).unwrap() < dog.score(&[1.0, 0.0]).unwrap());
    }

    #[test]
    fn test_skip_class_without_positives() {
        let mut bows = BTreeMap::new();
        bows.insert("cat".to_string(), vec![vec![1.0, 0.0]]);
        bows.insert("dog".to_string(), vec![vec![0.0, 1.0]]);
        bows.insert("bird".to_string(), vec![]);
        let models = train_all_classes(&bows, &SvmParams::default()).unwrap();
        assert_eq!(models.keys().collect::<Vec<_>>(), vec!["cat", "dog"]);
    }

    #[test]
    fn test_extract_skips_broken_images() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not an image").unwrap();
        let flat = dir.path().join("flat.png");
        image::GrayImage::from_pixel(32, 32, image::Luma([0])).save(&flat).unwrap();

        let entries = vec![ImageEntry::new("cat", broken), ImageEntry::new("cat", flat)];
        let extractor = crate::extract::PatchExtractor::default();
        let store = extract_descriptors(&extractor, &entries).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries[0].image_id, "cat/flat.png");
        assert_eq!(store.total_descriptors(), 0);
    }

    #[test]
    fn test_build_reference_store() {
        let reference = build_reference_store(&store(), IndexKind::Hnsw);
        assert_eq!(reference.index_kind, IndexKind::Hnsw);
        assert_eq!(reference.descriptors, store());
    }
}
