use image::DynamicImage;
use ndarray::{Array3, ArrayView3};

use super::ExtractError;
use crate::config::{Normalization, ResizeFilter};

const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];
const TORCH_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const TORCH_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 预处理后的图片，布局为 `(高, 宽, 通道)`
#[derive(Debug, Clone)]
pub struct DecodedImage {
    tensor: Array3<f32>,
}

impl DecodedImage {
    /// 从已经预处理好的张量创建，要求为正方形的三通道图片
    pub fn from_tensor(tensor: Array3<f32>) -> Result<Self, ExtractError> {
        let (h, w, c) = tensor.dim();
        if h != w || c != 3 || h == 0 {
            return Err(ExtractError::ShapeMismatch { expected: h as u32, actual: (h, w, c) });
        }
        Ok(Self { tensor })
    }

    pub fn side(&self) -> u32 {
        self.tensor.dim().0 as u32
    }

    pub fn tensor(&self) -> ArrayView3<'_, f32> {
        self.tensor.view()
    }

    /// 检查尺寸是否为提取器需要的尺寸
    pub fn expect_side(&self, side: u32) -> Result<(), ExtractError> {
        if self.side() != side {
            return Err(ExtractError::ShapeMismatch { expected: side, actual: self.tensor.dim() });
        }
        Ok(())
    }
}

/// 预处理参数：缩放尺寸、插值方式与像素归一化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessing {
    pub size: u32,
    pub filter: ResizeFilter,
    pub normalization: Normalization,
}

impl Preprocessing {
    pub fn new(size: u32, filter: ResizeFilter, normalization: Normalization) -> Self {
        Self { size, filter, normalization }
    }

    /// 用于组成提取器标识的描述
    pub fn describe(&self) -> String {
        format!("{}px-{}-{}", self.size, self.filter.name(), self.normalization.name())
    }

    /// 缩放到固定尺寸（不保持长宽比）并归一化
    pub fn apply(&self, image: &DynamicImage) -> DecodedImage {
        let side = self.size as usize;
        let rgb = image.resize_exact(self.size, self.size, self.filter.as_filter_type()).to_rgb8();

        let mut tensor = Array3::<f32>::zeros((side, side, 3));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for (c, &value) in pixel.0.iter().enumerate() {
                let (channel, value) = normalize(self.normalization, c, value);
                tensor[[y as usize, x as usize, channel]] = value;
            }
        }
        DecodedImage { tensor }
    }
}

/// 返回 (目标通道, 归一化后的值)
fn normalize(normalization: Normalization, channel: usize, value: u8) -> (usize, f32) {
    let value = value as f32;
    match normalization {
        Normalization::Tf => (channel, value / 127.5 - 1.),
        Normalization::Caffe => {
            let bgr = 2 - channel;
            (bgr, value - CAFFE_MEAN_BGR[bgr])
        }
        Normalization::Torch => (channel, (value / 255. - TORCH_MEAN[channel]) / TORCH_STD[channel]),
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use rstest::rstest;

    use super::*;

    fn solid(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 6, Rgb([r, g, b])))
    }

    #[test]
    fn test_resize_to_square() {
        let pre = Preprocessing::new(8, ResizeFilter::Triangle, Normalization::Tf);
        let decoded = pre.apply(&solid(0, 0, 0));
        assert_eq!(decoded.tensor().dim(), (8, 8, 3));
        assert_eq!(decoded.side(), 8);
        assert!(decoded.expect_side(8).is_ok());
        assert!(matches!(
            decoded.expect_side(224),
            Err(ExtractError::ShapeMismatch { expected: 224, .. })
        ));
    }

    #[rstest]
    #[case::tf(Normalization::Tf, [-1.0, 1.0, 255. / 127.5 - 1.])]
    #[case::caffe(Normalization::Caffe, [255. - 103.939, 255. - 116.779, 0. - 123.68])]
    #[case::torch(
        Normalization::Torch,
        [(0. - 0.485) / 0.229, (1. - 0.456) / 0.224, (1. - 0.406) / 0.225]
    )]
    fn test_normalization(#[case] normalization: Normalization, #[case] expected: [f32; 3]) {
        // R=0, G=255, B=255
        let pre = Preprocessing::new(4, ResizeFilter::Nearest, normalization);
        let decoded = pre.apply(&solid(0, 255, 255));
        let pixel = decoded.tensor();
        for c in 0..3 {
            assert!((pixel[[2, 1, c]] - expected[c]).abs() < 1e-5, "channel {c}");
        }
    }

    #[test]
    fn test_from_tensor_rejects_bad_shape() {
        assert!(DecodedImage::from_tensor(Array3::zeros((4, 4, 3))).is_ok());
        assert!(DecodedImage::from_tensor(Array3::zeros((4, 5, 3))).is_err());
        assert!(DecodedImage::from_tensor(Array3::zeros((4, 4, 1))).is_err());
    }

    #[test]
    fn test_describe() {
        let pre = Preprocessing::new(224, ResizeFilter::Triangle, Normalization::Tf);
        assert_eq!(pre.describe(), "224px-triangle-tf");
    }
}
