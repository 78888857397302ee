use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, KMeansOptions, Opts};
use crate::kmeans::KMeansParams;
use crate::training::{build_vocabulary, extract_descriptors};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub kmeans: KMeansOptions,
    /// 训练集目录，每个子目录为一个类别
    #[arg(long, value_name = "DIR")]
    pub image_dir: PathBuf,
    /// 描述符保存路径
    #[arg(long, value_name = "FILE")]
    pub descriptors: PathBuf,
    /// 视觉词汇表保存路径
    #[arg(long, value_name = "FILE")]
    pub vocabulary: PathBuf,
}

impl SubCommandExtend for BuildCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let entries = self
            .extractor
            .scanner()?
            .scan_labeled(&self.image_dir)
            .with_context(|| format!("无法扫描训练集 {}", self.image_dir.display()))?;
        if entries.is_empty() {
            bail!("训练集 {} 中没有图片", self.image_dir.display());
        }
        info!("找到 {} 张训练图片", entries.len());

        let extractor = self.extractor.create();
        let store = extract_descriptors(extractor.as_ref(), &entries)?;
        store
            .save(&self.descriptors)
            .with_context(|| format!("无法保存描述符到 {}", self.descriptors.display()))?;
        info!("保存描述符到 {}", self.descriptors.display());

        let params = KMeansParams::from(&self.kmeans);
        let vocabulary = build_vocabulary(store.stacked().view(), &params)?;
        vocabulary
            .save(&self.vocabulary)
            .with_context(|| format!("无法保存词汇表到 {}", self.vocabulary.display()))?;
        info!("构建词汇表成功，共 {} 个视觉单词", vocabulary.len());
        Ok(())
    }
}
