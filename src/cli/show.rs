use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::report::{OutputFormat, Report};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// test 保存的分类结果
    #[arg(long, value_name = "FILE")]
    pub result: PathBuf,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ShowCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let report = Report::load(&self.result)
            .with_context(|| format!("无法加载分类结果 {}", self.result.display()))?;
        print!("{}", report.render(self.output_format)?);
        Ok(())
    }
}
