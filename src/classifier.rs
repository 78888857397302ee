//! 两阶段分类：先用各类别的 SVM 分数选出候选类别，再用局部描述符的最近邻匹配确认
//!
//! 每个阶段是一个独立的结构体，由上一阶段消耗自身得到：
//! `Encoded -> Scored -> Shortlisted -> Confirmed -> Resolved`

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use clap::ValueEnum;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressIterator};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{BowError, BowResult};
use crate::extract::{Descriptors, FeatureExtractor};
use crate::index::{FlatIndex, Neighbor, NeighborIndex};
use crate::manifest::Query;
use crate::reference::ReferenceSets;
use crate::report::{ClassificationResult, UNKNOWN};
use crate::svm::ClassModel;
use crate::utils::{TimeMeasure, pb_style};
use crate::vocabulary::{BowDescriptor, Vocabulary};

/// 匹配百分比的分母
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PercentBasis {
    /// 查询图片的描述符数量
    #[default]
    Query,
    /// 候选类别的参考描述符数量
    Reference,
    /// 取两者中较小的百分比
    Both,
}

/// 最近邻确认的范围
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfirmScope {
    /// 每个候选类别只与自己的参考描述符匹配
    #[default]
    Shortlist,
    /// 与所有类别的参考描述符一起匹配，好匹配归属于最近邻所在的类别
    Global,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// 候选类别数量
    pub shortlist: usize,
    /// 最近距离小于 ratio * 次近距离时视为好匹配
    pub ratio: f32,
    /// 好匹配百分比的阈值
    pub percent_threshold: f32,
    /// 好匹配数量的阈值
    pub count_threshold: usize,
    pub basis: PercentBasis,
    pub scope: ConfirmScope,
    /// 百分比略低于阈值时，与匹配最多的单张参考图片重新匹配
    pub marginal_rescue: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            shortlist: 2,
            ratio: 0.75,
            percent_threshold: 7.5,
            count_threshold: 10,
            basis: PercentBasis::Query,
            scope: ConfirmScope::Shortlist,
            marginal_rescue: false,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> BowResult<()> {
        if self.shortlist == 0 {
            return Err(BowError::Configuration("候选类别数量必须大于 0".to_string()));
        }
        if !(self.ratio > 0.0 && self.ratio <= 1.0) {
            return Err(BowError::Configuration(format!("ratio 必须在 (0, 1] 之间: {}", self.ratio)));
        }
        if !(self.percent_threshold >= 0.0) {
            return Err(BowError::Configuration(format!(
                "百分比阈值不能为负数: {}",
                self.percent_threshold
            )));
        }
        Ok(())
    }
}

/// 某个类别的好匹配统计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MatchStats {
    pub count: usize,
    pub percent: f32,
    pub reference_percent: f32,
}

impl MatchStats {
    pub fn new(count: usize, query_count: usize, reference_count: usize) -> Self {
        let pct = |n: usize| if n == 0 { 0.0 } else { 100.0 * count as f32 / n as f32 };
        Self { count, percent: pct(query_count), reference_percent: pct(reference_count) }
    }

    pub fn effective_percent(&self, basis: PercentBasis) -> f32 {
        match basis {
            PercentBasis::Query => self.percent,
            PercentBasis::Reference => self.reference_percent,
            PercentBasis::Both => self.percent.min(self.reference_percent),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    /// 百分比略低于阈值，但与单张参考图片匹配时达到阈值
    Rescued,
    /// SVM 和最近邻匹配的结果不一致
    NotShortlisted,
    PercentTooLow,
    CountTooLow,
}

impl Decision {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted | Self::Rescued)
    }
}

/// 根据匹配结果决定是否接受最佳候选类别，依次检查是否在候选列表中、百分比、数量
pub fn resolve_label(
    in_shortlist: bool,
    percent: f32,
    count: usize,
    config: &ClassifierConfig,
) -> Decision {
    if !in_shortlist {
        Decision::NotShortlisted
    } else if percent < config.percent_threshold {
        Decision::PercentTooLow
    } else if count < config.count_threshold {
        Decision::CountTooLow
    } else {
        Decision::Accepted
    }
}

struct Candidate<'a> {
    score: f32,
    order: usize,
    class: &'a str,
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// 分数越高越差，分数相同时后出现的更差
impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then(self.order.cmp(&other.order))
    }
}

/// 选出分数最低的 n 个类别，按分数从低到高排列
///
/// 使用容量为 n 的最大堆，分数相同时按类别在 scores 中的顺序优先
pub fn select_shortlist(scores: &BTreeMap<String, f32>, n: usize) -> Vec<(String, f32)> {
    let mut heap = BinaryHeap::with_capacity(n + 1);
    for (order, (class, &score)) in scores.iter().enumerate() {
        heap.push(Candidate { score, order, class });
        if heap.len() > n {
            heap.pop();
        }
    }
    heap.into_sorted_vec().into_iter().map(|c| (c.class.to_string(), c.score)).collect()
}

/// 返回通过比例测试的好匹配的最近邻 ID
fn good_matches(neighbors: &[Vec<Neighbor>], ratio: f32) -> impl Iterator<Item = usize> + '_ {
    neighbors
        .iter()
        .filter(move |n| n.len() >= 2 && n[0].distance < ratio * n[1].distance)
        .map(|n| n[0].id)
}

/// 返回计数最多的图片，数量相同时取序号较小的
fn most_matched(tally: &BTreeMap<usize, usize>) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (&image, &count) in tally {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((image, count));
        }
    }
    best.map(|(image, _)| image)
}

pub struct Encoded {
    /// 查询图片的局部描述符
    pub descriptors: Descriptors,
    pub bow: BowDescriptor,
}

impl Encoded {
    pub fn new(descriptors: Descriptors, vocabulary: &Vocabulary) -> BowResult<Self> {
        let bow = vocabulary.encode(descriptors.view())?;
        Ok(Self { descriptors, bow })
    }

    pub fn score(self, models: &BTreeMap<String, ClassModel>) -> BowResult<Scored> {
        if models.is_empty() {
            return Err(BowError::NoTrainedClasses);
        }
        let scores = models
            .iter()
            .map(|(class, model)| Ok((class.clone(), model.score(&self.bow)?)))
            .collect::<BowResult<BTreeMap<_, _>>>()?;
        Ok(Scored { encoded: self, scores })
    }
}

pub struct Scored {
    pub encoded: Encoded,
    pub scores: BTreeMap<String, f32>,
}

impl Scored {
    pub fn shortlist(self, n: usize) -> Shortlisted {
        let shortlist = select_shortlist(&self.scores, n);
        Shortlisted { scored: self, shortlist }
    }
}

pub struct Shortlisted {
    pub scored: Scored,
    pub shortlist: Vec<(String, f32)>,
}

impl Shortlisted {
    pub fn is_shortlisted(&self, class: &str) -> bool {
        self.shortlist.iter().any(|(c, _)| c == class)
    }

    pub fn confirm(
        self,
        references: &ReferenceSets,
        config: &ClassifierConfig,
    ) -> BowResult<Confirmed> {
        let query = self.scored.encoded.descriptors.view();
        let nq = query.nrows();
        let mut matches = BTreeMap::new();
        let mut best_images = BTreeMap::new();

        match config.scope {
            ConfirmScope::Shortlist => {
                for (class, _) in &self.shortlist {
                    let set = references.get(class)?;
                    let neighbors = set.knn_search(query, 2)?;
                    let mut tally = BTreeMap::new();
                    for id in good_matches(&neighbors, config.ratio) {
                        *tally.entry(set.image_of(id)).or_insert(0) += 1;
                    }
                    let count = tally.values().sum();
                    matches.insert(class.clone(), MatchStats::new(count, nq, set.len()));
                    if let Some(image) = most_matched(&tally) {
                        best_images.insert(class.clone(), set.images[image].image_id.clone());
                    }
                }
            }
            ConfirmScope::Global => {
                let set = references.global()?;
                let neighbors = set.knn_search(query, 2)?;
                let mut tallies: BTreeMap<&str, BTreeMap<usize, usize>> = BTreeMap::new();
                for id in good_matches(&neighbors, config.ratio) {
                    let tally = tallies.entry(set.label_of(id)).or_default();
                    *tally.entry(set.image_of(id)).or_insert(0) += 1;
                }
                for label in references.labels() {
                    let Ok(class_set) = references.get(label) else { continue };
                    let tally = tallies.remove(label).unwrap_or_default();
                    let count = tally.values().sum();
                    let stats = MatchStats::new(count, nq, class_set.len());
                    matches.insert(label.to_string(), stats);
                    if let Some(image) = most_matched(&tally) {
                        best_images.insert(label.to_string(), set.images[image].image_id.clone());
                    }
                }
            }
        }

        Ok(Confirmed { shortlisted: self, matches, best_images })
    }
}

pub struct Confirmed {
    pub shortlisted: Shortlisted,
    pub matches: BTreeMap<String, MatchStats>,
    /// 每个类别中好匹配最多的参考图片
    pub best_images: BTreeMap<String, String>,
}

impl Confirmed {
    /// 有效百分比最高的类别，百分比相同时取类别名较小的
    pub fn best_match(&self, basis: PercentBasis) -> Option<(&str, &MatchStats)> {
        let mut best: Option<(&str, &MatchStats)> = None;
        for (class, stats) in &self.matches {
            let p = stats.effective_percent(basis);
            if best.is_none_or(|(_, b)| p > b.effective_percent(basis)) {
                best = Some((class, stats));
            }
        }
        best
    }

    /// 将查询描述符与 class 中匹配最多的单张参考图片重新匹配，返回好匹配的百分比
    fn pairwise_percent(
        &self,
        class: &str,
        references: &ReferenceSets,
        config: &ClassifierConfig,
    ) -> BowResult<Option<f32>> {
        let Some(image_id) = self.best_images.get(class) else { return Ok(None) };
        let set = references.get(class)?;
        let Some(image) = set.images.iter().position(|e| &e.image_id == image_id) else {
            return Ok(None);
        };
        let query = self.shortlisted.scored.encoded.descriptors.view();
        let index = FlatIndex::new(set.image_descriptors(image).to_owned());
        let neighbors = index.knn_search(query, 2)?;
        let count = good_matches(&neighbors, config.ratio).count();
        Ok(Some(MatchStats::new(count, query.nrows(), 0).percent))
    }

    pub fn resolve(
        self,
        references: &ReferenceSets,
        config: &ClassifierConfig,
    ) -> BowResult<Resolved> {
        let best = self.best_match(config.basis).map(|(c, s)| (c.to_string(), *s));
        let Some((class, stats)) = best else {
            return Ok(Resolved {
                confirmed: self,
                candidate: None,
                decision: None,
                pairwise_percent: None,
            });
        };
        let in_shortlist = self.shortlisted.is_shortlisted(&class);
        let percent = stats.effective_percent(config.basis);
        let mut decision = resolve_label(in_shortlist, percent, stats.count, config);

        let mut pairwise_percent = None;
        if config.marginal_rescue
            && decision == Decision::PercentTooLow
            && stats.count >= config.count_threshold
            && percent >= config.percent_threshold / 3.0
        {
            pairwise_percent = self.pairwise_percent(&class, references, config)?;
            if pairwise_percent.is_some_and(|p| p >= config.percent_threshold) {
                decision = Decision::Rescued;
            }
        }

        Ok(Resolved {
            confirmed: self,
            candidate: Some(class),
            decision: Some(decision),
            pairwise_percent,
        })
    }
}

pub struct Resolved {
    pub confirmed: Confirmed,
    pub candidate: Option<String>,
    pub decision: Option<Decision>,
    pub pairwise_percent: Option<f32>,
}

impl Resolved {
    pub fn evaluated_class(&self) -> &str {
        match (&self.candidate, self.decision) {
            (Some(class), Some(d)) if d.is_accepted() => class,
            _ => UNKNOWN,
        }
    }

    pub fn into_result(self, query: &Query) -> ClassificationResult {
        let evaluated_class = self.evaluated_class().to_string();
        let Resolved { confirmed, candidate, pairwise_percent, .. } = self;
        let matches = &confirmed.matches;
        ClassificationResult {
            query_id: query.id.clone(),
            expected_class: query.expected.clone(),
            evaluated_class,
            best_reference: candidate.as_ref().and_then(|c| confirmed.best_images.get(c).cloned()),
            candidate_class: candidate,
            scores: confirmed.shortlisted.scored.scores.clone(),
            match_percents: matches.iter().map(|(c, m)| (c.clone(), m.percent)).collect(),
            reference_match_percents: matches
                .iter()
                .map(|(c, m)| (c.clone(), m.reference_percent))
                .collect(),
            match_counts: matches.iter().map(|(c, m)| (c.clone(), m.count)).collect(),
            pairwise_percent,
            error: None,
        }
    }
}

/// 分类器，持有分类需要的所有只读数据，可以在多个线程间共享
pub struct Classifier {
    extractor: Box<dyn FeatureExtractor>,
    vocabulary: Vocabulary,
    models: BTreeMap<String, ClassModel>,
    references: ReferenceSets,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(
        extractor: Box<dyn FeatureExtractor>,
        vocabulary: Vocabulary,
        models: BTreeMap<String, ClassModel>,
        references: ReferenceSets,
        config: ClassifierConfig,
    ) -> BowResult<Self> {
        config.validate()?;
        if models.is_empty() {
            return Err(BowError::NoTrainedClasses);
        }
        if extractor.descriptor_size() != vocabulary.descriptor_size() {
            return Err(BowError::DimensionMismatch {
                expected: vocabulary.descriptor_size(),
                actual: extractor.descriptor_size(),
            });
        }
        if let Some(model) = models.values().find(|m| m.svm.dim() != vocabulary.len()) {
            warn!("类别 {} 的分类器维度与词汇表不一致", model.class_name);
            let (expected, actual) = (vocabulary.len(), model.svm.dim());
            return Err(BowError::DimensionMismatch { expected, actual });
        }
        Ok(Self { extractor, vocabulary, models, references, config })
    }

    pub fn classes(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// 对已经提取好的描述符进行分类
    pub fn classify_descriptors(
        &self,
        query: &Query,
        descriptors: Descriptors,
    ) -> BowResult<ClassificationResult> {
        let mut tm = TimeMeasure::new();
        let encoded = tm.measure("encode", || Encoded::new(descriptors, &self.vocabulary))?;
        let shortlisted = encoded.score(&self.models)?.shortlist(self.config.shortlist);
        let confirmed =
            tm.measure("confirm", || shortlisted.confirm(&self.references, &self.config))?;
        let resolved = confirmed.resolve(&self.references, &self.config)?;
        debug!(
            "{}: 候选 {:?}，决策 {:?}，编码 {:?}，确认 {:?}",
            query.id,
            resolved.confirmed.shortlisted.shortlist,
            resolved.decision,
            tm.get("encode"),
            tm.get("confirm")
        );
        Ok(resolved.into_result(query))
    }

    /// 对单张图片分类，任何错误都只会使该图片的结果变为 `unknown`
    pub fn classify(&self, query: &Query) -> ClassificationResult {
        let result = self
            .extractor
            .detect_file(&query.path)
            .and_then(|descriptors| self.classify_descriptors(query, descriptors));
        match result {
            Ok(result) => result,
            Err(e) => {
                warn!("{} 分类失败: {e}", query.id);
                ClassificationResult::failed(query, &e)
            }
        }
    }

    /// 批量分类，jobs 大于 1 时使用多线程，结果按查询 ID 排列
    pub fn classify_batch(
        &self,
        queries: &[Query],
        jobs: usize,
    ) -> BowResult<BTreeMap<String, ClassificationResult>> {
        let pb = ProgressBar::new(queries.len() as u64).with_style(pb_style());
        let results: Vec<_> = if jobs > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .map_err(|e| BowError::Configuration(e.to_string()))?;
            pool.install(|| {
                let queries = queries.par_iter().progress_with(pb.clone());
                queries.map(|q| self.classify(q)).collect::<Vec<_>>()
            })
        } else {
            queries.iter().progress_with(pb.clone()).map(|q| self.classify(q)).collect::<Vec<_>>()
        };
        pb.finish_and_clear();
        Ok(results.into_iter().map(|r| (r.query_id.clone(), r)).collect())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Axis, array, concatenate};
    use rstest::*;

    use super::*;
    use crate::index::IndexKind;
    use crate::manifest::ImageEntry;
    use crate::reference::ReferenceStore;
    use crate::store::DescriptorStore;

    fn scores(pairs: &[(&str, f32)]) -> BTreeMap<String, f32> {
        pairs.iter().map(|(c, s)| (c.to_string(), *s)).collect()
    }

    fn confirmed(
        class_scores: &[(&str, f32)],
        n: usize,
        matches: &[(&str, usize, f32)],
    ) -> Confirmed {
        let encoded = Encoded { descriptors: Array2::zeros((0, 2)), bow: vec![] };
        let scored = Scored { encoded, scores: scores(class_scores) };
        let matches = matches
            .iter()
            .map(|&(c, count, percent)| {
                (c.to_string(), MatchStats { count, percent, reference_percent: percent })
            })
            .collect();
        Confirmed { shortlisted: scored.shortlist(n), matches, best_images: BTreeMap::new() }
    }

    fn empty_references() -> ReferenceSets {
        ReferenceStore::new(IndexKind::Flat, DescriptorStore::new(2)).build().unwrap()
    }

    #[test]
    fn test_select_shortlist() {
        let s = scores(&[("a", 0.5), ("b", -1.0), ("c", 2.0), ("d", -0.2), ("e", 0.1)]);
        let top = select_shortlist(&s, 3);
        assert_eq!(
            top,
            vec![("b".to_string(), -1.0), ("d".to_string(), -0.2), ("e".to_string(), 0.1)]
        );
        let max = top.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
        for (class, score) in &s {
            if !top.iter().any(|(c, _)| c == class) {
                assert!(*score >= max);
            }
        }
    }

    #[test]
    fn test_select_shortlist_ties_and_bounds() {
        let s = scores(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
        let top: Vec<_> = select_shortlist(&s, 2).into_iter().map(|(c, _)| c).collect();
        assert_eq!(top, vec!["a", "b"]);
        assert_eq!(select_shortlist(&s, 10).len(), 3);
        assert!(select_shortlist(&s, 0).is_empty());
    }

    #[rstest]
    #[case(false, false, false, Decision::NotShortlisted)]
    #[case(false, false, true, Decision::NotShortlisted)]
    #[case(false, true, false, Decision::NotShortlisted)]
    #[case(false, true, true, Decision::NotShortlisted)]
    #[case(true, false, false, Decision::PercentTooLow)]
    #[case(true, false, true, Decision::PercentTooLow)]
    #[case(true, true, false, Decision::CountTooLow)]
    #[case(true, true, true, Decision::Accepted)]
    fn test_threshold_truth_table(
        #[case] in_shortlist: bool,
        #[case] percent_ok: bool,
        #[case] count_ok: bool,
        #[case] expected: Decision,
    ) {
        let config = ClassifierConfig::default();
        let percent = if percent_ok { 7.5 } else { 7.4 };
        let count = if count_ok { 10 } else { 9 };
        assert_eq!(resolve_label(in_shortlist, percent, count, &config), expected);
    }

    #[test]
    fn test_cat_accepted() {
        let c = confirmed(&[("cat", -1.2), ("dog", 0.4)], 1, &[("cat", 12, 20.0)]);
        let r = c.resolve(&empty_references(), &ClassifierConfig::default()).unwrap();
        assert_eq!(r.decision, Some(Decision::Accepted));
        assert_eq!(r.evaluated_class(), "cat");

        let c = confirmed(&[("cat", -1.2), ("dog", 0.4)], 1, &[("cat", 9, 20.0)]);
        let r = c.resolve(&empty_references(), &ClassifierConfig::default()).unwrap();
        assert_eq!(r.decision, Some(Decision::CountTooLow));
        assert_eq!(r.evaluated_class(), UNKNOWN);

        let c = confirmed(&[("cat", -1.2), ("dog", 0.4)], 1, &[("cat", 10, 20.0)]);
        let r = c.resolve(&empty_references(), &ClassifierConfig::default()).unwrap();
        assert_eq!(r.decision, Some(Decision::Accepted));
        assert_eq!(r.evaluated_class(), "cat");
    }

    #[test]
    fn test_low_percent_is_unknown() {
        let c = confirmed(&[("cat", -1.2), ("dog", 0.4)], 1, &[("cat", 30, 5.0)]);
        let r = c.resolve(&empty_references(), &ClassifierConfig::default()).unwrap();
        assert_eq!(r.decision, Some(Decision::PercentTooLow));
        assert_eq!(r.evaluated_class(), UNKNOWN);
    }

    #[test]
    fn test_best_outside_shortlist_is_unknown() {
        let c = confirmed(
            &[("cat", -1.2), ("dog", 0.4)],
            1,
            &[("cat", 12, 8.0), ("dog", 60, 40.0)],
        );
        assert_eq!(c.best_match(PercentBasis::Query).map(|(c, _)| c), Some("dog"));
        let r = c.resolve(&empty_references(), &ClassifierConfig::default()).unwrap();
        assert_eq!(r.decision, Some(Decision::NotShortlisted));
        assert_eq!(r.candidate.as_deref(), Some("dog"));
        assert_eq!(r.evaluated_class(), UNKNOWN);
    }

    #[test]
    fn test_no_matches_is_unknown() {
        let c = confirmed(&[("cat", -1.2)], 1, &[]);
        let r = c.resolve(&empty_references(), &ClassifierConfig::default()).unwrap();
        assert_eq!(r.decision, None);
        assert_eq!(r.evaluated_class(), UNKNOWN);
    }

    #[test]
    fn test_percent_basis() {
        let stats = MatchStats::new(10, 100, 40);
        assert_eq!(stats.effective_percent(PercentBasis::Query), 10.0);
        assert_eq!(stats.effective_percent(PercentBasis::Reference), 25.0);
        assert_eq!(stats.effective_percent(PercentBasis::Both), 10.0);
        assert_eq!(MatchStats::new(3, 0, 0).percent, 0.0);
    }

    #[test]
    fn test_no_trained_classes() {
        let encoded = Encoded { descriptors: Array2::zeros((0, 2)), bow: vec![0.0; 2] };
        assert!(matches!(encoded.score(&BTreeMap::new()), Err(BowError::NoTrainedClasses)));
    }

    #[test]
    fn test_config_validate() {
        assert!(ClassifierConfig::default().validate().is_ok());
        assert!(ClassifierConfig { shortlist: 0, ..Default::default() }.validate().is_err());
        assert!(ClassifierConfig { ratio: 1.5, ..Default::default() }.validate().is_err());
    }

    /// 以 (cx, cy) 为起点的 n 个参考描述符，相邻描述符的距离约为 0.1
    fn block(cx: f32, cy: f32, n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, 2), |(i, j)| {
            let offset = i as f32 * 0.1;
            if j == 0 { cx + offset } else { cy + offset * offset }
        })
    }

    /// 两个类别，每个类别的参考描述符聚集在不同的位置
    #[fixture]
    fn references() -> ReferenceSets {
        let mut store = DescriptorStore::new(2);
        store.push(ImageEntry::new("cat", "cat/1.png"), block(0.0, 0.0, 12)).unwrap();
        store.push(ImageEntry::new("dog", "dog/1.png"), block(100.0, 100.0, 12)).unwrap();
        store.push(ImageEntry::new("dog", "dog/2.png"), block(100.0, -100.0, 12)).unwrap();
        ReferenceStore::new(IndexKind::Flat, store).build().unwrap()
    }

    fn shortlisted(descriptors: Array2<f32>, pairs: &[(&str, f32)], n: usize) -> Shortlisted {
        let encoded = Encoded { descriptors, bow: vec![] };
        Scored { encoded, scores: scores(pairs) }.shortlist(n)
    }

    /// 与 (cx, cy) 附近的参考描述符几乎重合的查询描述符
    fn near(cx: f32, cy: f32, n: usize) -> Array2<f32> {
        block(cx, cy, n) + &array![0.001, 0.0]
    }

    /// 远离所有参考描述符的查询描述符
    fn far(n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, 2), |(i, j)| 5000.0 + i as f32 * 50.0 + j as f32 * 7.0)
    }

    #[rstest]
    fn test_confirm_shortlist_scope(references: ReferenceSets) {
        let config = ClassifierConfig::default();
        let s = shortlisted(near(0.0, 0.0, 12), &[("cat", -1.0), ("dog", 1.0)], 2);
        let c = s.confirm(&references, &config).unwrap();

        assert_eq!(c.matches["cat"].count, 12);
        assert_eq!(c.matches["cat"].percent, 100.0);
        assert_eq!(c.matches["dog"].count, 0);
        assert_eq!(c.best_images["cat"], "cat/1.png");
        let r = c.resolve(&references, &config).unwrap();
        assert_eq!(r.evaluated_class(), "cat");
    }

    #[rstest]
    fn test_confirm_global_scope(references: ReferenceSets) {
        let config = ClassifierConfig { scope: ConfirmScope::Global, ..Default::default() };
        let s = shortlisted(near(100.0, -100.0, 12), &[("cat", -1.0), ("dog", 1.0)], 1);
        let c = s.confirm(&references, &config).unwrap();

        assert_eq!(c.matches["dog"].count, 12);
        assert_eq!(c.matches["dog"].reference_percent, 50.0);
        assert_eq!(c.best_images["dog"], "dog/2.png");
        let r = c.resolve(&references, &config).unwrap();
        assert_eq!(r.decision, Some(Decision::NotShortlisted));
        assert_eq!(r.evaluated_class(), UNKNOWN);
    }

    #[rstest]
    fn test_confirm_missing_reference_set(references: ReferenceSets) {
        let s = shortlisted(near(0.0, 0.0, 3), &[("fish", -1.0)], 1);
        let err = s.confirm(&references, &ClassifierConfig::default()).err();
        assert!(matches!(err, Some(BowError::EmptyReferenceSet(l)) if l == "fish"));
    }

    #[test]
    fn test_marginal_rescue() {
        // bird/2 是 bird/1 前半部分的副本，与之对应的查询描述符在类别内无法通过比例测试
        let mut store = DescriptorStore::new(2);
        let first = concatenate![Axis(0), block(0.0, 500.0, 12), block(500.0, 0.0, 12)];
        store.push(ImageEntry::new("bird", "bird/1.png"), first).unwrap();
        store.push(ImageEntry::new("bird", "bird/2.png"), block(0.0, 500.0, 12)).unwrap();
        let references = ReferenceStore::new(IndexKind::Flat, store).build().unwrap();
        let query = concatenate![Axis(0), near(500.0, 0.0, 12), near(0.0, 500.0, 12), far(96)];
        let config = ClassifierConfig { percent_threshold: 20.0, ..Default::default() };

        let run = |config: &ClassifierConfig| {
            let s = shortlisted(query.clone(), &[("bird", -1.0)], 1);
            let c = s.confirm(&references, config).unwrap();
            assert_eq!(c.matches["bird"].count, 12);
            assert_eq!(c.matches["bird"].percent, 10.0);
            assert_eq!(c.best_images["bird"], "bird/1.png");
            c.resolve(&references, config).unwrap()
        };

        let r = run(&config);
        assert_eq!(r.decision, Some(Decision::PercentTooLow));
        assert_eq!(r.pairwise_percent, None);
        assert_eq!(r.evaluated_class(), UNKNOWN);

        let r = run(&ClassifierConfig { marginal_rescue: true, ..config });
        assert_eq!(r.pairwise_percent, Some(20.0));
        assert_eq!(r.decision, Some(Decision::Rescued));
        assert_eq!(r.evaluated_class(), "bird");
    }

    #[test]
    fn test_classifier_rejects_empty_models() {
        let vocabulary = Vocabulary::new(array![[0.0, 0.0], [1.0, 1.0]]);
        let extractor = Box::new(crate::extract::PatchExtractor::default());
        let err = Classifier::new(
            extractor,
            vocabulary,
            BTreeMap::new(),
            empty_references(),
            ClassifierConfig::default(),
        )
        .err();
        assert!(matches!(err, Some(BowError::NoTrainedClasses)));
    }

    #[test]
    fn test_into_result() {
        let c = confirmed(&[("cat", -1.2), ("dog", 0.4)], 1, &[("cat", 30, 12.0)]);
        let r = c.resolve(&empty_references(), &ClassifierConfig::default()).unwrap();
        let query = Query::new("/data/cat/01.png", Some("cat".to_string()));
        let result = r.into_result(&query);
        assert_eq!(result.query_id, "cat/01.png");
        assert_eq!(result.evaluated_class, "cat");
        assert_eq!(result.candidate_class.as_deref(), Some("cat"));
        assert_eq!(result.scores.len(), 2);
        assert_eq!(result.match_counts["cat"], 30);
        assert!(!result.is_misclassified());
    }
}
