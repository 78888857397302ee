use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::vocabulary::Vocabulary;

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// 视觉词汇表路径
    #[arg(long, value_name = "FILE")]
    pub vocabulary: PathBuf,
    /// 导出路径
    #[arg(short, long, value_name = "FILE", default_value = "vocabulary.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let vocabulary = Vocabulary::load(&self.vocabulary)
            .with_context(|| format!("无法加载词汇表 {}", self.vocabulary.display()))?;
        write_npy(&self.output, &vocabulary.words())?;
        info!("导出 {} 个视觉单词到 {}", vocabulary.len(), self.output.display());
        Ok(())
    }
}
