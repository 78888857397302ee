use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, Opts, SvmOptions};
use crate::error::BowError;
use crate::index::IndexKind;
use crate::store::DescriptorStore;
use crate::svm::{SvmParams, save_models};
use crate::training::{
    build_reference_store, compute_labeled_bows, extract_descriptors, train_all_classes,
};
use crate::vocabulary::Vocabulary;

#[derive(Parser, Debug, Clone)]
pub struct TrainCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub svm: SvmOptions,
    /// 视觉词汇表路径
    #[arg(long, value_name = "FILE")]
    pub vocabulary: PathBuf,
    /// build 生成的描述符路径
    #[arg(long, value_name = "FILE")]
    pub descriptors: PathBuf,
    /// 重新计算该目录中图片的描述符作为参考描述符，不指定时使用 descriptors 中的描述符
    #[arg(long, value_name = "DIR")]
    pub image_dir: Option<PathBuf>,
    /// 分类器保存路径的前缀，每个类别保存为 `<PREFIX>_<类别>.svm`
    #[arg(long, value_name = "PREFIX")]
    pub classifier_prefix: PathBuf,
    /// 参考描述符保存路径
    #[arg(long, value_name = "FILE")]
    pub matcher_file: PathBuf,
    /// 最近邻索引类型
    #[arg(long, value_enum, default_value_t = IndexKind::Flat)]
    pub index: IndexKind,
}

impl TrainCommand {
    fn reference_descriptors(&self, store: DescriptorStore) -> Result<DescriptorStore> {
        let Some(dir) = &self.image_dir else { return Ok(store) };
        let entries = self
            .extractor
            .scanner()?
            .scan_labeled(dir)
            .with_context(|| format!("无法扫描参考图片 {}", dir.display()))?;
        let extractor = self.extractor.create();
        if extractor.descriptor_size() != store.descriptor_size {
            let (expected, actual) = (store.descriptor_size, extractor.descriptor_size());
            return Err(BowError::DimensionMismatch { expected, actual }.into());
        }
        info!("重新计算 {} 张参考图片的描述符", entries.len());
        Ok(extract_descriptors(extractor.as_ref(), &entries)?)
    }
}

impl SubCommandExtend for TrainCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let vocabulary = Vocabulary::load(&self.vocabulary)
            .with_context(|| format!("无法加载词汇表 {}", self.vocabulary.display()))?;
        let store = DescriptorStore::load(&self.descriptors)
            .with_context(|| format!("无法加载描述符 {}", self.descriptors.display()))?;
        if store.descriptor_size != vocabulary.descriptor_size() {
            let (expected, actual) = (vocabulary.descriptor_size(), store.descriptor_size);
            return Err(BowError::DimensionMismatch { expected, actual }.into());
        }

        let bows = compute_labeled_bows(&store, &vocabulary)?;
        let models = train_all_classes(&bows, &SvmParams::from(&self.svm))?;
        if models.is_empty() {
            return Err(BowError::NoTrainedClasses.into());
        }
        let references = self.reference_descriptors(store)?;
        let reference_store = build_reference_store(&references, self.index);

        save_models(&self.classifier_prefix, &models).with_context(|| {
            format!("无法保存分类器到 {}", self.classifier_prefix.display())
        })?;
        reference_store
            .save(&self.matcher_file)
            .with_context(|| format!("无法保存参考描述符到 {}", self.matcher_file.display()))?;
        info!("训练完成，共 {} 个类别", models.len());
        Ok(())
    }
}
