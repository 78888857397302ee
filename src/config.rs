use clap::{Parser, Subcommand};

use crate::classifier::{ClassifierConfig, ConfirmScope, PercentBasis};
use crate::cli::*;
use crate::error::BowResult;
#[cfg(feature = "opencv")]
use crate::extract::{OrbExtractor, OrbParams};
use crate::extract::{ExtractorKind, FeatureExtractor, PatchExtractor, PatchParams};
use crate::kmeans::KMeansParams;
use crate::manifest::{DEFAULT_SUFFIX, ImageScanner};
use crate::svm::SvmParams;

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// 特征提取器
    #[arg(long, value_enum, default_value_t = ExtractorKind::Patch)]
    pub extractor: ExtractorKind,
    /// 特征点最大保留数量
    #[arg(short = 'n', value_name = "N", long, default_value_t = 500)]
    pub nfeatures: usize,
    /// FAST 角点检测阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 20)]
    pub fast_threshold: u8,
    /// 图片最大尺寸，如果宽或高超过这个尺寸，则等比缩放
    #[arg(short = 'S', long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "1080x768")]
    pub max_size: (u32, u32),
    /// 图片最大长宽比例，超过这个比例的图片，会按比例增加特征点数量
    #[arg(short = 'A', long, value_name = "RATIO", default_value_t = 5.)]
    pub max_aspect_ratio: f32,
    /// 最大特征点数量
    #[arg(long, default_value_t = 1000)]
    pub max_features: usize,
    /// ORB 特征金字塔缩放因子
    #[cfg(feature = "opencv")]
    #[arg(long, value_name = "SCALE", default_value_t = 1.2)]
    pub orb_scale_factor: f32,
    /// ORB 特征金字塔层数
    #[cfg(feature = "opencv")]
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub orb_nlevels: i32,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
}

impl ExtractorOptions {
    pub fn create(&self) -> Box<dyn FeatureExtractor> {
        match self.extractor {
            ExtractorKind::Patch => Box::new(PatchExtractor::new(PatchParams::from(self))),
            #[cfg(feature = "opencv")]
            ExtractorKind::Orb => Box::new(OrbExtractor::new(OrbParams::from(self))),
        }
    }

    pub fn scanner(&self) -> BowResult<ImageScanner> {
        ImageScanner::new(&self.suffix)
    }
}

impl From<&ExtractorOptions> for PatchParams {
    fn from(opts: &ExtractorOptions) -> Self {
        Self {
            nfeatures: opts.nfeatures,
            fast_threshold: opts.fast_threshold,
            max_size: opts.max_size,
            max_aspect_ratio: opts.max_aspect_ratio,
            max_features: opts.max_features,
        }
    }
}

#[cfg(feature = "opencv")]
impl From<&ExtractorOptions> for OrbParams {
    fn from(opts: &ExtractorOptions) -> Self {
        Self {
            nfeatures: opts.nfeatures as i32,
            scale_factor: opts.orb_scale_factor,
            nlevels: opts.orb_nlevels,
            fast_threshold: opts.fast_threshold as i32,
            max_size: (opts.max_size.0 as i32, opts.max_size.1 as i32),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct KMeansOptions {
    /// 视觉单词数量，即聚类中心数量
    #[arg(short = 'k', long, value_name = "K", default_value_t = 1000)]
    pub clusters: usize,
    /// 最大迭代次数
    #[arg(short, long, default_value_t = 20)]
    pub max_iter: usize,
    /// 随机数种子
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<&KMeansOptions> for KMeansParams {
    fn from(opts: &KMeansOptions) -> Self {
        Self {
            clusters: opts.clusters,
            max_iter: opts.max_iter,
            seed: opts.seed,
            verbose: true,
            ..Default::default()
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SvmOptions {
    /// SVM 惩罚系数
    #[arg(long, value_name = "C", default_value_t = 1.0)]
    pub svm_c: f32,
    /// SVM 最大迭代轮数
    #[arg(long, value_name = "N", default_value_t = 1000)]
    pub svm_max_iter: usize,
    /// 不按正负样本数量调整惩罚系数
    #[arg(long)]
    pub svm_unbalanced: bool,
}

impl From<&SvmOptions> for SvmParams {
    fn from(opts: &SvmOptions) -> Self {
        Self {
            c: opts.svm_c,
            max_iter: opts.svm_max_iter,
            balanced: !opts.svm_unbalanced,
            ..Default::default()
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ClassifyOptions {
    /// SVM 分数最低的候选类别数量
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub shortlist: usize,
    /// 最近距离小于 ratio * 次近距离时视为好匹配
    #[arg(long, value_name = "RATIO", default_value_t = 0.75)]
    pub ratio: f32,
    /// 好匹配百分比低于该值时，结果为 unknown
    #[arg(long, value_name = "PERCENT", default_value_t = 7.5)]
    pub percent_threshold: f32,
    /// 好匹配数量低于该值时，结果为 unknown
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub count_threshold: usize,
    /// 匹配百分比的分母
    #[arg(long, value_enum, default_value_t = PercentBasis::Query)]
    pub basis: PercentBasis,
    /// 最近邻确认的范围
    #[arg(long, value_enum, default_value_t = ConfirmScope::Shortlist)]
    pub scope: ConfirmScope,
    /// 百分比略低于阈值时，与匹配最多的单张参考图片重新匹配
    #[arg(long)]
    pub marginal_rescue: bool,
    /// 并行分类的线程数量
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,
}

impl From<&ClassifyOptions> for ClassifierConfig {
    fn from(opts: &ClassifyOptions) -> Self {
        Self {
            shortlist: opts.shortlist,
            ratio: opts.ratio,
            percent_threshold: opts.percent_threshold,
            count_threshold: opts.count_threshold,
            basis: opts.basis,
            scope: opts.scope,
            marginal_rescue: opts.marginal_rescue,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "bowsvm", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 输出调试日志
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 计算训练集的描述符并构建视觉词汇表
    Build(BuildCommand),
    /// 训练每个类别的分类器，保存参考描述符
    Train(TrainCommand),
    /// 对图片进行分类，统计错误率
    Test(TestCommand),
    /// 显示保存的分类结果
    Show(ShowCommand),
    /// 导出视觉词汇表为 npy 文件
    Export(ExportCommand),
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(anyhow::anyhow!("无效的尺寸: {}", s));
    }
    Ok((parts[0].parse()?, parts[1].parse()?))
}
