//! 图片特征提取
//!
//! 提取器被视为一个黑盒：输入预处理后的图片，输出固定长度的向量。
//! 只有同一个 [`FeatureExtractor::identity`] 产生的向量之间才可以比较。

mod conv;
mod preprocess;

use std::sync::Mutex;

use thiserror::Error;

pub use self::conv::ConvExtractor;
pub use self::preprocess::*;

/// 图片向量
pub type Embedding = Vec<f32>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("输入尺寸不符: 需要 {expected}x{expected}x3，实际为 {actual:?}")]
    ShapeMismatch { expected: u32, actual: (usize, usize, usize) },
    #[error("输出向量长度不符: 需要 {expected}，实际为 {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("输出向量第 {index} 维不是有限值")]
    NonFinite { index: usize },
    #[error("输出向量全为零")]
    Degenerate,
    #[error("提取器内部错误: {0}")]
    Backend(String),
}

/// 特征提取器
///
/// 要求 `Send + Sync`，同一个实例会被多个线程同时调用。
/// 内部状态不可重入的实现请用 [`Serialized`] 包装。
pub trait FeatureExtractor: Send + Sync {
    /// 提取器标识，包含模型与预处理配置，写入向量库用于校验
    fn identity(&self) -> &str;

    /// 输出向量维度
    fn dimension(&self) -> usize;

    /// 输入图片边长
    fn input_size(&self) -> u32;

    /// 预处理方式
    fn preprocessing(&self) -> Preprocessing;

    /// 计算一张已预处理图片的向量
    fn embed(&self, image: &DecodedImage) -> Result<Embedding, ExtractError>;

    /// 预处理并计算向量
    fn embed_image(&self, image: &image::DynamicImage) -> Result<Embedding, ExtractError> {
        let decoded = self.preprocessing().apply(image);
        self.embed(&decoded)
    }
}

/// 检查提取器输出，零向量或包含 NaN/Inf 的向量视为计算失败
pub fn validate_embedding(embedding: &[f32], dimension: usize) -> Result<(), ExtractError> {
    if embedding.len() != dimension {
        return Err(ExtractError::WrongLength { expected: dimension, actual: embedding.len() });
    }
    if let Some(index) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(ExtractError::NonFinite { index });
    }
    if embedding.iter().all(|&v| v == 0.) {
        return Err(ExtractError::Degenerate);
    }
    Ok(())
}

/// 需要独占访问的提取器
pub trait ExclusiveExtractor: Send {
    fn identity(&self) -> &str;
    fn dimension(&self) -> usize;
    fn input_size(&self) -> u32;
    fn preprocessing(&self) -> Preprocessing;
    fn embed(&mut self, image: &DecodedImage) -> Result<Embedding, ExtractError>;
}

/// 用互斥锁串行化对提取器的调用
pub struct Serialized<E> {
    identity: String,
    dimension: usize,
    input_size: u32,
    preprocessing: Preprocessing,
    inner: Mutex<E>,
}

impl<E: ExclusiveExtractor> Serialized<E> {
    pub fn new(inner: E) -> Self {
        Self {
            identity: inner.identity().to_string(),
            dimension: inner.dimension(),
            input_size: inner.input_size(),
            preprocessing: inner.preprocessing(),
            inner: Mutex::new(inner),
        }
    }
}

impl<E: ExclusiveExtractor> FeatureExtractor for Serialized<E> {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn preprocessing(&self) -> Preprocessing {
        self.preprocessing
    }

    fn embed(&self, image: &DecodedImage) -> Result<Embedding, ExtractError> {
        let mut inner =
            self.inner.lock().map_err(|_| ExtractError::Backend("提取器锁已损坏".to_string()))?;
        let embedding = inner.embed(image)?;
        validate_embedding(&embedding, self.dimension)?;
        Ok(embedding)
    }
}
