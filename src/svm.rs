use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{BowError, BowResult};
use crate::store::{load_bincode, save_bincode};

pub const MODEL_SUFFIX: &str = "svm";

/// 线性 SVM 训练参数
#[derive(Debug, Clone)]
pub struct SvmParams {
    /// 惩罚系数
    pub c: f32,
    /// 按正负样本数量调整惩罚系数，使两类的总权重相同
    pub balanced: bool,
    /// 最大迭代轮数
    pub max_iter: usize,
    /// 投影梯度的收敛阈值
    pub tolerance: f32,
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self { c: 1.0, balanced: true, max_iter: 1000, tolerance: 1e-3, seed: 42 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvm {
    pub weights: Vec<f32>,
    pub bias: f32,
}

impl LinearSvm {
    /// 使用对偶坐标下降训练 L1 损失的线性 SVM，偏置项作为值恒为 1 的额外维度参与训练
    pub fn train(positives: &[&[f32]], negatives: &[&[f32]], params: &SvmParams) -> Self {
        let dim = positives.iter().chain(negatives).map(|x| x.len()).max().unwrap_or(0);
        let samples: Vec<(&[f32], f32)> = positives
            .iter()
            .map(|x| (*x, 1.0))
            .chain(negatives.iter().map(|x| (*x, -1.0)))
            .collect();

        let (np, nn) = (positives.len() as f32, negatives.len() as f32);
        let (cp, cn) = if params.balanced && np > 0.0 && nn > 0.0 {
            let n = np + nn;
            (params.c * n / (2.0 * np), params.c * n / (2.0 * nn))
        } else {
            (params.c, params.c)
        };

        // w 的最后一维为偏置
        let mut w = vec![0f32; dim + 1];
        let mut alpha = vec![0f32; samples.len()];
        let qd: Vec<f32> = samples.iter().map(|(x, _)| dot(x, x) + 1.0).collect();
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut rng = StdRng::seed_from_u64(params.seed);

        let mut iter = 0;
        while iter < params.max_iter {
            iter += 1;
            order.shuffle(&mut rng);
            let (mut pg_max, mut pg_min) = (f32::NEG_INFINITY, f32::INFINITY);
            for &i in &order {
                let (x, y) = samples[i];
                let upper = if y > 0.0 { cp } else { cn };
                let g = y * (dot(&w[..dim], x) + w[dim]) - 1.0;
                let pg = if alpha[i] == 0.0 {
                    g.min(0.0)
                } else if alpha[i] >= upper {
                    g.max(0.0)
                } else {
                    g
                };
                pg_max = pg_max.max(pg);
                pg_min = pg_min.min(pg);
                if pg.abs() > 1e-12 {
                    let old = alpha[i];
                    alpha[i] = (alpha[i] - g / qd[i]).clamp(0.0, upper);
                    let delta = (alpha[i] - old) * y;
                    for (wj, xj) in w.iter_mut().zip(x) {
                        *wj += delta * xj;
                    }
                    w[dim] += delta;
                }
            }
            if pg_max - pg_min <= params.tolerance {
                break;
            }
        }
        debug!("SVM 训练完成，迭代 {iter} 轮");

        let bias = w.pop().unwrap_or(0.0);
        Self { weights: w, bias }
    }

    pub fn dim(&self) -> usize {
        self.weights.len()
    }

    /// 决策值，越大越可能是正样本
    pub fn decision(&self, x: &[f32]) -> f32 {
        dot(&self.weights, x) + self.bias
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

/// 某个类别的一对多分类器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassModel {
    pub class_name: String,
    pub svm: LinearSvm,
}

impl ClassModel {
    pub fn train(
        class_name: &str,
        positives: &[&[f32]],
        negatives: &[&[f32]],
        params: &SvmParams,
    ) -> BowResult<Self> {
        if positives.is_empty() {
            return Err(BowError::InsufficientTrainingData(class_name.to_string()));
        }
        let svm = LinearSvm::train(positives, negatives, params);
        Ok(Self { class_name: class_name.to_string(), svm })
    }

    /// 分数为决策值的相反数，分数越低越可能属于该类别
    pub fn score(&self, bow: &[f32]) -> BowResult<f32> {
        if bow.len() != self.svm.dim() {
            return Err(BowError::DimensionMismatch { expected: self.svm.dim(), actual: bow.len() });
        }
        Ok(-self.svm.decision(bow))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> BowResult<()> {
        save_bincode(self, path)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> BowResult<Self> {
        load_bincode(path)
    }
}

/// 分类器文件路径：`<prefix>_<class>.svm`
///
/// 类别名中不适合出现在文件名中的字符会被替换为 `_`，真正的类别名保存在文件内容中
pub fn model_path(prefix: &Path, class_name: &str) -> PathBuf {
    let safe: String = class_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    let name = prefix.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    prefix.with_file_name(format!("{name}_{safe}.{MODEL_SUFFIX}"))
}

pub fn save_models<P: AsRef<Path>>(
    prefix: P,
    models: &BTreeMap<String, ClassModel>,
) -> BowResult<()> {
    for model in models.values() {
        let path = model_path(prefix.as_ref(), &model.class_name);
        model.save(&path)?;
        info!("保存类别 {} 的分类器到 {}", model.class_name, path.display());
    }
    Ok(())
}

/// 加载前缀为 prefix 的所有分类器，没有找到任何分类器时返回 `NoTrainedClasses`
pub fn load_models<P: AsRef<Path>>(prefix: P) -> BowResult<BTreeMap<String, ClassModel>> {
    let prefix = prefix.as_ref();
    let name = prefix
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| BowError::Configuration(format!("无效的分类器前缀 {}", prefix.display())))?;
    let dir = match prefix.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let head = format!("{name}_");
    let tail = format!(".{MODEL_SUFFIX}");

    let mut paths = vec![];
    for entry in std::fs::read_dir(&dir).map_err(|e| BowError::load(&dir, e))? {
        let path = entry?.path();
        let file_name =
            path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        if file_name.starts_with(&head) && file_name.ends_with(&tail) && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut models = BTreeMap::new();
    for path in paths {
        let model = ClassModel::load(&path)?;
        debug!("加载类别 {} 的分类器 {}", model.class_name, path.display());
        models.insert(model.class_name.clone(), model);
    }
    if models.is_empty() {
        return Err(BowError::NoTrainedClasses);
    }
    info!("加载了 {} 个分类器", models.len());
    Ok(models)
}
