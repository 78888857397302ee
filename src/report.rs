use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{BowError, BowResult};
use crate::manifest::Query;

pub const UNKNOWN: &str = "unknown";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// 单张图片的分类结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub query_id: String,
    pub expected_class: Option<String>,
    /// 最终类别，无法确定时为 `unknown`
    pub evaluated_class: String,
    /// 最近邻确认中匹配度最高的类别
    pub candidate_class: Option<String>,
    /// 各类别的 SVM 分数，越低越好
    pub scores: BTreeMap<String, f32>,
    /// 好匹配数量占查询描述符数量的百分比
    pub match_percents: BTreeMap<String, f32>,
    /// 好匹配数量占参考描述符数量的百分比
    pub reference_match_percents: BTreeMap<String, f32>,
    pub match_counts: BTreeMap<String, usize>,
    /// 候选类别中匹配最多的参考图片
    pub best_reference: Option<String>,
    /// 与 best_reference 单独匹配的百分比，仅在边缘情况下计算
    pub pairwise_percent: Option<f32>,
    /// 分类失败的原因
    pub error: Option<String>,
}

impl ClassificationResult {
    pub fn new(query: &Query) -> Self {
        Self {
            query_id: query.id.clone(),
            expected_class: query.expected.clone(),
            evaluated_class: UNKNOWN.to_string(),
            candidate_class: None,
            scores: BTreeMap::new(),
            match_percents: BTreeMap::new(),
            reference_match_percents: BTreeMap::new(),
            match_counts: BTreeMap::new(),
            best_reference: None,
            pairwise_percent: None,
            error: None,
        }
    }

    /// 分类失败的结果，类别为 `unknown`，所有分数都被清空
    pub fn failed(query: &Query, error: &BowError) -> Self {
        Self { error: Some(error.to_string()), ..Self::new(query) }
    }

    pub fn is_unknown(&self) -> bool {
        self.evaluated_class == UNKNOWN
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// 有期望类别且分类结果与之不同
    pub fn is_misclassified(&self) -> bool {
        matches!(&self.expected_class, Some(expected) if *expected != self.evaluated_class)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// 处理的图片数量
    pub processed: usize,
    pub unknown: usize,
    pub failed: usize,
    /// 有期望类别的图片数量
    pub evaluated: usize,
    pub errors: usize,
    /// errors / evaluated * 100
    pub error_rate: f32,
}

impl Summary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ClassificationResult>) -> Self {
        let mut summary = Self::default();
        for r in results {
            summary.processed += 1;
            summary.unknown += r.is_unknown() as usize;
            summary.failed += r.is_failed() as usize;
            summary.evaluated += r.expected_class.is_some() as usize;
            summary.errors += r.is_misclassified() as usize;
        }
        if summary.evaluated > 0 {
            summary.error_rate = summary.errors as f32 / summary.evaluated as f32 * 100.0;
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// 已训练的类别
    pub classes: Vec<String>,
    pub summary: Summary,
    pub results: BTreeMap<String, ClassificationResult>,
}

impl Report {
    pub fn new(classes: Vec<String>, results: BTreeMap<String, ClassificationResult>) -> Self {
        let summary = Summary::from_results(results.values());
        Self { classes, summary, results }
    }

    pub fn misclassified(&self) -> impl Iterator<Item = &ClassificationResult> {
        self.results.values().filter(|r| r.is_misclassified())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> BowResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> BowResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| BowError::load(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| BowError::load(path, e))
    }

    pub fn render(&self, format: OutputFormat) -> BowResult<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Table => Ok(self.render_table()),
        }
    }

    fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "类别: {}", self.classes.join(", "));
        for r in self.results.values() {
            let percent = r
                .candidate_class
                .as_ref()
                .and_then(|c| r.match_percents.get(c))
                .map(|p| format!("{p:.2}"))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}",
                r.query_id,
                r.expected_class.as_deref().unwrap_or("-"),
                r.evaluated_class,
                percent
            );
        }
        let s = &self.summary;
        let _ = writeln!(out, "处理图片: {}，unknown: {}，失败: {}", s.processed, s.unknown, s.failed);
        let _ = writeln!(out, "错误: {} / {}，错误率: {:.2}%", s.errors, s.evaluated, s.error_rate);
        let misclassified: Vec<_> = self.misclassified().collect();
        if !misclassified.is_empty() {
            let _ = writeln!(out, "分类错误的图片:");
            for r in misclassified {
                let expected = r.expected_class.as_deref().unwrap_or("-");
                let _ = writeln!(out, "  {}: {} -> {}", r.query_id, expected, r.evaluated_class);
            }
        }
        out
    }
}
