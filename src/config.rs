use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use image::imageops::FilterType;

use crate::cli::*;

static CONF_DIR: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
    ProjectDirs::from("", "imretrieve", "imretrieve").map(|dirs| dirs.config_dir().to_path_buf())
});

fn default_config_dir() -> String {
    CONF_DIR
        .as_ref()
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string())
}

/// 大于 0 的整数
pub fn positive_usize() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::<usize>::new().range(1..)
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// 输入网络前图片缩放到的边长
    #[arg(long, value_name = "SIZE", default_value_t = 224, value_parser = clap::value_parser!(u32).range(3..=4096))]
    pub input_size: u32,
    /// 缩放图片使用的插值方式，缩放是有损的，建库和查询必须一致
    #[arg(long, value_enum, value_name = "FILTER", default_value_t = ResizeFilter::Triangle)]
    pub resize_filter: ResizeFilter,
    /// 像素预处理方式，与模型训练时不一致会悄悄降低检索质量
    #[arg(long, value_enum, value_name = "MODE", default_value_t = Normalization::Tf)]
    pub normalization: Normalization,
    /// 第一层卷积的通道数
    #[arg(long, value_name = "N", default_value_t = 32, value_parser = positive_usize())]
    pub hidden_channels: usize,
    /// 输出向量维度，即第二层卷积的通道数
    #[arg(long, value_name = "DIM", default_value_t = 256, value_parser = positive_usize())]
    pub dimension: usize,
    /// 生成卷积权重的随机种子
    #[arg(long, value_name = "SEED", default_value_t = 0x1a2b_3c4d)]
    pub seed: u64,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            input_size: 224,
            resize_filter: ResizeFilter::Triangle,
            normalization: Normalization::Tf,
            hidden_channels: 32,
            dimension: 256,
            seed: 0x1a2b_3c4d,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 3)]
    pub count: usize,
    /// 向量库文件路径，默认为配置目录下的 embeddings.csv
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imretrieve", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imretrieve 配置目录
    #[arg(short, long, default_value_t = ConfDir::new(default_config_dir()))]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 为数据集中的所有图片计算向量并保存
    Index(IndexCommand),
    /// 搜索与给定图片最相似的图片
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 显示向量库信息
    Info(InfoCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回向量库文件的路径
    pub fn store(&self) -> PathBuf {
        self.path.join("embeddings.csv")
    }

    /// 返回图片目录的路径
    pub fn images(&self) -> PathBuf {
        self.path.join("images")
    }
}

impl fmt::Display for ConfDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFilter {
    /// 最近邻
    Nearest,
    /// 双线性
    Triangle,
    /// Catmull-Rom 三次插值
    CatmullRom,
    /// 高斯
    Gaussian,
    /// Lanczos (窗口 3)
    Lanczos3,
}

impl ResizeFilter {
    pub fn as_filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Triangle => "triangle",
            Self::CatmullRom => "catmull-rom",
            Self::Gaussian => "gaussian",
            Self::Lanczos3 => "lanczos3",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// 缩放到 [-1, 1]，ResNetV2 / Inception 系列使用
    Tf,
    /// 转为 BGR 后减去 ImageNet 均值，ResNet50 (caffe) 使用
    Caffe,
    /// 缩放到 [0, 1] 后按 ImageNet 均值方差标准化
    Torch,
}

impl Normalization {
    pub fn name(self) -> &'static str {
        match self {
            Self::Tf => "tf",
            Self::Caffe => "caffe",
            Self::Torch => "torch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conf_dir_paths() {
        let conf = ConfDir::from_str("/tmp/imretrieve").unwrap();
        assert_eq!(conf.store(), PathBuf::from("/tmp/imretrieve/embeddings.csv"));
        assert_eq!(conf.images(), PathBuf::from("/tmp/imretrieve/images"));
    }

    #[test]
    fn test_parse_index_command() {
        let opts = Opts::try_parse_from([
            "imretrieve",
            "-c",
            "/data",
            "index",
            "data.csv",
            "--resize-filter",
            "lanczos3",
            "--dimension",
            "64",
        ])
        .unwrap();
        assert_eq!(opts.conf_dir.path(), Path::new("/data"));
        match opts.subcmd {
            SubCommand::Index(cmd) => {
                assert_eq!(cmd.extractor.resize_filter, ResizeFilter::Lanczos3);
                assert_eq!(cmd.extractor.dimension, 64);
                assert_eq!(cmd.extractor.input_size, 224);
            }
            _ => panic!("expected index subcommand"),
        }
    }
}
