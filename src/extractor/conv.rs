use ndarray::{Array1, Array2, Array3, ArrayView3, Axis, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{DecodedImage, Embedding, ExtractError, FeatureExtractor, Preprocessing, validate_embedding};
use crate::config::ExtractorOptions;

const KERNEL: usize = 3;
const STRIDE: usize = 2;

/// 3x3、步长为 2、填充为 1 的卷积层，后接 ReLU
///
/// 权重按 im2col 后的布局保存，形状为 `(3 * 3 * 输入通道, 输出通道)`
#[derive(Debug, Clone)]
struct ConvLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl ConvLayer {
    /// He uniform 初始化
    fn random(rng: &mut StdRng, input: usize, output: usize, bias: (f32, f32)) -> Self {
        let fan_in = KERNEL * KERNEL * input;
        let bound = (6. / fan_in as f32).sqrt();
        let weights = Array2::from_shape_simple_fn((fan_in, output), || rng.random_range(-bound..bound));
        let bias = Array1::from_shape_simple_fn(output, || rng.random_range(bias.0..bias.1));
        Self { weights, bias }
    }

    fn output_channels(&self) -> usize {
        self.bias.len()
    }

    /// 返回形状为 `(输出高 * 输出宽, 输出通道)` 的激活值
    fn forward(&self, input: ArrayView3<f32>) -> Array2<f32> {
        let mut output = im2col(input).dot(&self.weights);
        output += &self.bias;
        output.mapv_inplace(|v| v.max(0.));
        output
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        for v in self.weights.iter().chain(self.bias.iter()) {
            hasher.update(&v.to_le_bytes());
        }
    }
}

fn output_side(side: usize) -> usize {
    (side - 1) / STRIDE + 1
}

/// 将 `(高, 宽, 通道)` 的输入展开为每个输出位置一行的矩阵
fn im2col(input: ArrayView3<f32>) -> Array2<f32> {
    let (h, w, c) = input.dim();
    let (oh, ow) = (output_side(h), output_side(w));
    let mut cols = Array2::<f32>::zeros((oh * ow, KERNEL * KERNEL * c));
    for oy in 0..oh {
        for ox in 0..ow {
            let mut row = cols.row_mut(oy * ow + ox);
            for ky in 0..KERNEL {
                // 填充为 1
                let Some(iy) = (oy * STRIDE + ky).checked_sub(1).filter(|&y| y < h) else {
                    continue;
                };
                for kx in 0..KERNEL {
                    let Some(ix) = (ox * STRIDE + kx).checked_sub(1).filter(|&x| x < w) else {
                        continue;
                    };
                    let offset = (ky * KERNEL + kx) * c;
                    row.slice_mut(s![offset..offset + c]).assign(&input.slice(s![iy, ix, ..]));
                }
            }
        }
    }
    cols
}

/// 内置的卷积特征提取器
///
/// 两层卷积加全局平均池化，权重由固定种子生成后冻结。
/// 权重只读，可以被多个线程同时使用。
#[derive(Debug, Clone)]
pub struct ConvExtractor {
    identity: String,
    preprocessing: Preprocessing,
    conv1: ConvLayer,
    conv2: ConvLayer,
}

impl ConvExtractor {
    pub fn new(opts: &ExtractorOptions) -> Self {
        let preprocessing = Preprocessing::new(opts.input_size, opts.resize_filter, opts.normalization);
        let mut rng = StdRng::seed_from_u64(opts.seed);
        let conv1 = ConvLayer::random(&mut rng, 3, opts.hidden_channels, (-0.05, 0.05));
        // 第二层使用正偏置，纯色图片的输出也不会全为零
        let conv2 = ConvLayer::random(&mut rng, opts.hidden_channels, opts.dimension, (0.01, 0.1));

        let mut hasher = blake3::Hasher::new();
        conv1.hash_into(&mut hasher);
        conv2.hash_into(&mut hasher);
        let fingerprint = hasher.finalize().to_hex();

        let identity = format!(
            "conv2-gap/{}/{}x{}/{}",
            preprocessing.describe(),
            opts.hidden_channels,
            opts.dimension,
            &fingerprint[..16]
        );

        Self { identity, preprocessing, conv1, conv2 }
    }

    fn forward(&self, image: &DecodedImage) -> Result<Embedding, ExtractError> {
        let side = image.side() as usize;
        let hidden = self.conv1.forward(image.tensor());
        let side = output_side(side);
        let hidden: Array3<f32> = hidden
            .into_shape_with_order((side, side, self.conv1.output_channels()))
            .map_err(|e| ExtractError::Backend(e.to_string()))?;
        let features = self.conv2.forward(hidden.view());
        let pooled = features.mean_axis(Axis(0)).ok_or(ExtractError::Degenerate)?;
        Ok(pooled.to_vec())
    }
}

impl FeatureExtractor for ConvExtractor {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn dimension(&self) -> usize {
        self.conv2.output_channels()
    }

    fn input_size(&self) -> u32 {
        self.preprocessing.size
    }

    fn preprocessing(&self) -> Preprocessing {
        self.preprocessing
    }

    fn embed(&self, image: &DecodedImage) -> Result<Embedding, ExtractError> {
        image.expect_side(self.preprocessing.size)?;
        let embedding = self.forward(image)?;
        validate_embedding(&embedding, self.dimension())?;
        Ok(embedding)
    }
}
