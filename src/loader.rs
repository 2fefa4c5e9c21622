use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageReader, Limits};
use log::debug;

/// 图片检查结果
///
/// 无法读取或无法解码的图片不会作为错误返回，而是作为普通数据交给调用方处理
#[derive(Debug)]
pub enum Loaded {
    Image(DynamicImage),
    Invalid(String),
}

impl Loaded {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    pub fn into_image(self) -> Option<DynamicImage> {
        match self {
            Self::Image(image) => Some(image),
            Self::Invalid(_) => None,
        }
    }
}

/// 图片加载器，负责读取与解码
#[derive(Debug, Clone)]
pub struct ImageLoader {
    max_side: u32,
    max_alloc: u64,
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self { max_side: 16384, max_alloc: 512 * 1024 * 1024 }
    }
}

impl ImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置允许的最大宽高，超过的图片视为无效
    pub fn max_side(mut self, max_side: u32) -> Self {
        self.max_side = max_side;
        self
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_side);
        limits.max_image_height = Some(self.max_side);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }

    /// 读取并解码一张图片
    pub fn check(&self, path: impl AsRef<Path>) -> Loaded {
        let path = path.as_ref();
        let reader = match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
            Ok(reader) => reader,
            Err(e) => {
                debug!("无法读取图片 {}: {}", path.display(), e);
                return Loaded::Invalid(e.to_string());
            }
        };
        self.decode(reader)
    }

    /// 解码内存中的图片数据
    pub fn check_bytes(&self, bytes: &[u8]) -> Loaded {
        match ImageReader::new(Cursor::new(bytes)).with_guessed_format() {
            Ok(reader) => self.decode(reader),
            Err(e) => Loaded::Invalid(e.to_string()),
        }
    }

    pub fn is_valid(&self, path: impl AsRef<Path>) -> bool {
        self.check(path).is_valid()
    }

    fn decode<R: std::io::BufRead + std::io::Seek>(&self, mut reader: ImageReader<R>) -> Loaded {
        if reader.format().is_none() {
            return Loaded::Invalid("unrecognized image format".to_string());
        }
        reader.limits(self.limits());
        match reader.decode() {
            Ok(image) if image.width() == 0 || image.height() == 0 => {
                Loaded::Invalid("empty image".to_string())
            }
            Ok(image) => Loaded::Image(image),
            Err(e) => Loaded::Invalid(e.to_string()),
        }
    }
}
