use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use log::info;
use serde::Deserialize;
use url::Url;

/// 数据集中的一张图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: i64,
    pub source_url: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct DatasetRow {
    id: i64,
    url: String,
}

/// 读取数据集 CSV，至少需要 `id` 和 `url` 两列，其他列会被忽略
///
/// 图片的本地路径为 `images_dir` 下与 URL 最后一段同名的文件
pub fn read_dataset(csv_path: impl AsRef<Path>, images_dir: impl AsRef<Path>) -> Result<Vec<ImageRecord>> {
    let csv_path = csv_path.as_ref();
    let images_dir = images_dir.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .with_context(|| format!("无法打开数据集 {}", csv_path.display()))?;

    let mut records = vec![];
    for (row, result) in reader.deserialize::<DatasetRow>().enumerate() {
        // 表头占第一行
        let line = row + 2;
        let DatasetRow { id, url } = result.with_context(|| format!("数据集第 {line} 行格式错误"))?;
        let local_path = local_path_for(&url, images_dir)
            .ok_or_else(|| anyhow!("数据集第 {line} 行的 URL 没有文件名: {url}"))?;
        records.push(ImageRecord { id, source_url: url, local_path });
    }

    info!("读取数据集 {}，共 {} 条记录", csv_path.display(), records.len());
    Ok(records)
}

/// 根据 URL 推导图片的本地路径，URL 不包含文件名时返回 None
///
/// 文件名为原始 URL 文本最后一个 `/` 之后的部分，与下载图片时保存的文件名一致：
/// 不做百分号解码，查询串也会保留。
pub fn local_path_for(url: &str, images_dir: impl AsRef<Path>) -> Option<PathBuf> {
    // 只有主机名或以 `/` 结尾的 URL 没有文件名
    if let Ok(parsed) = Url::parse(url) {
        if parsed.path_segments()?.next_back()?.is_empty() {
            return None;
        }
    }
    let name = url.rsplit('/').next()?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(images_dir.as_ref().join(name))
}
