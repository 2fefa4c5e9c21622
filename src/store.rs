use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::ArrayView2;
use thiserror::Error;

/// 向量库文件第一行的前缀，后接提取器标识
const IDENTITY_PREFIX: &str = "# extractor=";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("向量库读写失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("向量库 CSV 解析失败: {0}")]
    Csv(#[from] csv::Error),
    #[error("向量库格式错误 (第 {line} 行): {reason}")]
    Malformed { line: u64, reason: String },
    #[error("向量库缺少提取器标识")]
    MissingIdentity,
    #[error("向量库由提取器 {found} 生成，与当前提取器 {expected} 不一致")]
    IdentityMismatch { expected: String, found: String },
    #[error("向量维度不符: 向量库为 {expected}，输入为 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{id} 的向量第 {index} 维不是有限值")]
    NonFinite { id: i64, index: usize },
}

/// 图片 ID 到向量的映射
///
/// 迭代顺序为 ID 第一次插入的顺序。同一个 ID 重复插入时，后插入的向量覆盖先前的向量，
/// 但保留原来的位置。
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    identity: String,
    dim: usize,
    ids: Vec<i64>,
    rows: HashMap<i64, usize>,
    data: Vec<f32>,
}

impl EmbeddingStore {
    pub fn new(identity: impl Into<String>, dim: usize) -> Self {
        Self { identity: identity.into(), dim, ids: vec![], rows: HashMap::new(), data: vec![] }
    }

    /// 生成向量的提取器标识，为空表示未知
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 插入向量，返回该 ID 是否是第一次插入
    ///
    /// 包含 NaN/Inf 的向量会被拒绝，保存后无法再加载
    pub fn insert(&mut self, id: i64, vector: &[f32]) -> Result<bool, StoreError> {
        if vector.len() != self.dim {
            return Err(StoreError::DimensionMismatch { expected: self.dim, actual: vector.len() });
        }
        if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
            return Err(StoreError::NonFinite { id, index });
        }
        match self.rows.get(&id) {
            Some(&row) => {
                self.data[row * self.dim..(row + 1) * self.dim].copy_from_slice(vector);
                Ok(false)
            }
            None => {
                self.rows.insert(id, self.ids.len());
                self.ids.push(id);
                self.data.extend_from_slice(vector);
                Ok(true)
            }
        }
    }

    pub fn get(&self, id: i64) -> Option<&[f32]> {
        self.rows.get(&id).map(|&row| self.row(row))
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &[f32])> + '_ {
        self.ids.iter().enumerate().map(|(row, &id)| (id, self.row(row)))
    }

    /// 以矩阵形式返回全部向量，行顺序与 [`Self::ids`] 一致
    pub fn matrix(&self) -> ArrayView2<'_, f32> {
        ArrayView2::from_shape((self.ids.len(), self.dim), &self.data)
            .expect("data length always equals rows * dim")
    }

    fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.dim..(row + 1) * self.dim]
    }

    /// 保存为 CSV：第一行为提取器标识，之后为 `id,0,1,…` 表头与每个 ID 一行
    ///
    /// 数值按 32 位浮点数的最短往返表示写出，重新加载后完全一致
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // 先写临时文件再重命名，避免留下写了一半的向量库
        let tmp = tmp_path(path);
        let result = self.write_csv(&tmp).and_then(|()| Ok(fs::rename(&tmp, path)?));
        if let Err(e) = result {
            if tmp.exists() {
                if let Err(remove) = fs::remove_file(&tmp) {
                    warn!("无法删除临时文件 {}: {}", tmp.display(), remove);
                }
            }
            return Err(e);
        }
        info!("保存向量库 {}，共 {} 条，维度 {}", path.display(), self.len(), self.dim);
        Ok(())
    }

    fn write_csv(&self, path: &Path) -> Result<(), StoreError> {
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "{}{}", IDENTITY_PREFIX, self.identity)?;

        let mut writer = csv::Writer::from_writer(file);
        let header = std::iter::once("id".to_string()).chain((0..self.dim).map(|i| i.to_string()));
        writer.write_record(header)?;
        for (id, vector) in self.iter() {
            let record = std::iter::once(id.to_string()).chain(vector.iter().map(|v| v.to_string()));
            writer.write_record(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// 加载向量库
    ///
    /// 传入 `expected_identity` 时会检查文件中的提取器标识是否一致；
    /// 不传时也可以读取没有标识的文件。
    pub fn load(path: impl AsRef<Path>, expected_identity: Option<&str>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let identity = read_identity(path)?;
        debug!("向量库 {} 的提取器标识: {:?}", path.display(), identity);

        match (expected_identity, &identity) {
            (Some(_), None) => return Err(StoreError::MissingIdentity),
            (Some(expected), Some(found)) if expected != found => {
                return Err(StoreError::IdentityMismatch {
                    expected: expected.to_string(),
                    found: found.clone(),
                });
            }
            _ => {}
        }

        let mut reader = csv::ReaderBuilder::new().comment(Some(b'#')).from_path(path)?;
        let headers = reader.headers()?.clone();
        if headers.get(0).map(str::trim) != Some("id") {
            return Err(StoreError::Malformed { line: 1, reason: "第一列必须为 id".to_string() });
        }
        if headers.len() < 2 {
            return Err(StoreError::Malformed { line: 1, reason: "没有向量列".to_string() });
        }

        let mut store = Self::new(identity.unwrap_or_default(), headers.len() - 1);
        let mut vector = Vec::with_capacity(store.dim);
        for result in reader.records() {
            let record = result?;
            let line = record.position().map_or(0, |p| p.line());
            let malformed = |reason: String| StoreError::Malformed { line, reason };

            let id = record[0].trim().parse::<i64>().map_err(|e| malformed(format!("无效的 id: {e}")))?;
            vector.clear();
            for field in record.iter().skip(1) {
                let value =
                    field.trim().parse::<f32>().map_err(|e| malformed(format!("无效的数值: {e}")))?;
                if !value.is_finite() {
                    return Err(malformed(format!("数值不是有限值: {field}")));
                }
                vector.push(value);
            }
            store.insert(id, &vector)?;
        }

        info!("加载向量库 {}，共 {} 条，维度 {}", path.display(), store.len(), store.dim);
        Ok(store)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn read_identity(path: &Path) -> Result<Option<String>, StoreError> {
    let mut line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut line)?;
    Ok(line.trim_end().strip_prefix(IDENTITY_PREFIX).map(str::to_string))
}
