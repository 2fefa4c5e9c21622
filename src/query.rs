use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::extractor::{ExtractError, FeatureExtractor};
use crate::loader::{ImageLoader, Loaded};
use crate::metrics;
use crate::ranker::{self, Neighbor, RankError};
use crate::store::{EmbeddingStore, StoreError};
use crate::utils::format_duration;

/// 默认返回的结果数量
pub const DEFAULT_COUNT: usize = 3;

/// 对外暴露的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// 查询图片无法读取或解码，属于调用方的错误
    InvalidInput,
    /// 查询向量与向量库维度不一致，通常是配置错误
    DimensionMismatch,
    /// 出现零向量或包含非有限值的向量，无法计算余弦距离
    DegenerateVector,
    /// 向量库无法加载或与提取器不匹配
    StoreUnavailable,
    /// 提取器计算失败
    ExtractionFailed,
}

impl FaultKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::DegenerateVector => "degenerate_vector",
            Self::StoreUnavailable => "store_unavailable",
            Self::ExtractionFailed => "extraction_failed",
        }
    }

    pub fn is_client_fault(self) -> bool {
        matches!(self, Self::InvalidInput)
    }
}

#[derive(Debug, Error)]
pub enum Cause {
    #[error("图片无效: {0}")]
    InvalidImage(String),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Rank(#[from] RankError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 查询失败，内部错误在这里统一归类
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct QueryError {
    kind: FaultKind,
    cause: Cause,
}

impl QueryError {
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }
}

impl From<Cause> for QueryError {
    fn from(cause: Cause) -> Self {
        let kind = match &cause {
            Cause::InvalidImage(_) => FaultKind::InvalidInput,
            Cause::Extract(_) => FaultKind::ExtractionFailed,
            Cause::Rank(RankError::DimensionMismatch { .. }) => FaultKind::DimensionMismatch,
            Cause::Rank(RankError::DegenerateVector { .. }) => FaultKind::DegenerateVector,
            Cause::Store(StoreError::DimensionMismatch { .. }) => FaultKind::DimensionMismatch,
            Cause::Store(_) => FaultKind::StoreUnavailable,
        };
        Self { kind, cause }
    }
}

impl From<ExtractError> for QueryError {
    fn from(e: ExtractError) -> Self {
        Cause::from(e).into()
    }
}

impl From<RankError> for QueryError {
    fn from(e: RankError) -> Self {
        Cause::from(e).into()
    }
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        Cause::from(e).into()
    }
}

/// 查询图片的来源
#[derive(Debug, Clone, Copy)]
pub enum QueryImage<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

/// 查询服务
///
/// 提取器与向量库在创建时加载一次，之后只读，可以被多个线程同时调用。
pub struct QueryService {
    extractor: Arc<dyn FeatureExtractor>,
    loader: ImageLoader,
    store: Arc<EmbeddingStore>,
    default_count: usize,
}

impl QueryService {
    /// 使用已加载的向量库创建服务，要求向量库的提取器标识和维度与提取器一致
    pub fn new(
        store: Arc<EmbeddingStore>,
        extractor: Arc<dyn FeatureExtractor>,
        loader: ImageLoader,
    ) -> Result<Self, QueryError> {
        if store.identity() != extractor.identity() {
            return Err(StoreError::IdentityMismatch {
                expected: extractor.identity().to_string(),
                found: store.identity().to_string(),
            }
            .into());
        }
        if store.dimension() != extractor.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: extractor.dimension(),
                actual: store.dimension(),
            }
            .into());
        }
        if store.is_empty() {
            warn!("向量库为空，所有查询都将返回空结果");
        }
        Ok(Self { extractor, loader, store, default_count: DEFAULT_COUNT })
    }

    /// 从文件加载向量库并创建服务
    pub fn open(
        store_path: impl AsRef<Path>,
        extractor: Arc<dyn FeatureExtractor>,
        loader: ImageLoader,
    ) -> Result<Self, QueryError> {
        let store = EmbeddingStore::load(store_path, Some(extractor.identity()))?;
        info!("向量库已加载: {} 条，维度 {}", store.len(), store.dimension());
        Self::new(Arc::new(store), extractor, loader)
    }

    pub fn with_default_count(mut self, count: usize) -> Self {
        self.default_count = count;
        self
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn extractor(&self) -> &dyn FeatureExtractor {
        self.extractor.as_ref()
    }

    /// None 使用默认数量，小于等于 0 返回空结果
    fn resolve_count(&self, count: Option<i64>) -> usize {
        match count {
            None => self.default_count,
            Some(count) if count <= 0 => 0,
            Some(count) => usize::try_from(count).unwrap_or(usize::MAX),
        }
    }

    /// 搜索与图片最相似的条目，返回 ID 与距离
    pub fn search(&self, image: QueryImage<'_>, count: Option<i64>) -> Result<Vec<Neighbor>, QueryError> {
        let start = Instant::now();
        let result = self.search_inner(image, count);
        let elapsed = start.elapsed();

        metrics::inc_query(result.as_ref().err().map(QueryError::kind));
        metrics::observe_query_duration(elapsed.as_secs_f64());
        match &result {
            Ok(neighbors) => debug!("查询完成: {} 条结果，耗时 {}", neighbors.len(), format_duration(elapsed)),
            Err(e) => warn!("查询失败 [{}]: {}", e.kind().code(), e),
        }
        result
    }

    fn search_inner(&self, image: QueryImage<'_>, count: Option<i64>) -> Result<Vec<Neighbor>, QueryError> {
        // 先检查图片再调用提取器
        let loaded = match image {
            QueryImage::Path(path) => self.loader.check(path),
            QueryImage::Bytes(bytes) => self.loader.check_bytes(bytes),
        };
        let image = match loaded {
            Loaded::Image(image) => image,
            Loaded::Invalid(reason) => return Err(Cause::InvalidImage(reason).into()),
        };
        self.search_decoded(&image, count)
    }

    /// 搜索已解码的图片
    pub fn search_decoded(&self, image: &DynamicImage, count: Option<i64>) -> Result<Vec<Neighbor>, QueryError> {
        let embedding = self.extractor.embed_image(image)?;
        let neighbors = ranker::rank(&embedding, &self.store, self.resolve_count(count))?;
        Ok(neighbors)
    }

    /// 返回与图片文件最相似的图片 ID
    pub fn closest_ids(&self, path: impl AsRef<Path>, count: Option<i64>) -> Result<Vec<i64>, QueryError> {
        let neighbors = self.search(QueryImage::Path(path.as_ref()), count)?;
        Ok(neighbors.into_iter().map(|n| n.id).collect())
    }

    /// 返回与上传的图片数据最相似的图片 ID
    pub fn closest_ids_from_bytes(&self, bytes: &[u8], count: Option<i64>) -> Result<Vec<i64>, QueryError> {
        let neighbors = self.search(QueryImage::Bytes(bytes), count)?;
        Ok(neighbors.into_iter().map(|n| n.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};
    use tempfile::TempDir;

    use super::*;
    use crate::config::ExtractorOptions;
    use crate::extractor::ConvExtractor;

    fn extractor() -> Arc<dyn FeatureExtractor> {
        Arc::new(ConvExtractor::new(&ExtractorOptions {
            input_size: 16,
            hidden_channels: 4,
            dimension: 8,
            ..Default::default()
        }))
    }

    fn png(color: [u8; 3]) -> Vec<u8> {
        let mut bytes = vec![];
        RgbImage::from_fn(12, 12, |x, _| if x < 6 { Rgb(color) } else { Rgb([255, 255, 255]) })
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn service_with(rows: &[(i64, [u8; 3])]) -> QueryService {
        let extractor = extractor();
        let mut store = EmbeddingStore::new(extractor.identity(), extractor.dimension());
        let loader = ImageLoader::new();
        for (id, color) in rows {
            let image = loader.check_bytes(&png(*color)).into_image().unwrap();
            store.insert(*id, &extractor.embed_image(&image).unwrap()).unwrap();
        }
        QueryService::new(Arc::new(store), extractor, loader).unwrap()
    }

    #[test]
    fn test_query_returns_exact_match_first() {
        let service = service_with(&[(1, [255, 0, 0]), (2, [0, 0, 255]), (3, [0, 255, 0])]);
        let ids = service.closest_ids_from_bytes(&png([0, 0, 255]), None).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], 2);
    }

    #[test]
    fn test_count_resolution() {
        let service = service_with(&[(1, [255, 0, 0]), (2, [0, 0, 255]), (3, [0, 255, 0])])
            .with_default_count(2);
        let query = png([255, 0, 0]);
        assert_eq!(service.closest_ids_from_bytes(&query, None).unwrap().len(), 2);
        assert_eq!(service.closest_ids_from_bytes(&query, Some(1)).unwrap(), vec![1]);
        assert_eq!(service.closest_ids_from_bytes(&query, Some(10)).unwrap().len(), 3);
        assert!(service.closest_ids_from_bytes(&query, Some(0)).unwrap().is_empty());
        assert!(service.closest_ids_from_bytes(&query, Some(-5)).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_image_is_client_fault() {
        let service = service_with(&[(1, [255, 0, 0])]);
        let err = service.closest_ids_from_bytes(b"garbage", None).unwrap_err();
        assert_eq!(err.kind(), FaultKind::InvalidInput);
        assert!(err.kind().is_client_fault());

        let dir = TempDir::new().unwrap();
        let err = service.closest_ids(dir.path().join("missing.jpg"), None).unwrap_err();
        assert_eq!(err.kind(), FaultKind::InvalidInput);
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let service = service_with(&[]);
        assert!(service.closest_ids_from_bytes(&png([1, 2, 3]), Some(5)).unwrap().is_empty());
    }

    #[test]
    fn test_identity_mismatch_is_store_unavailable() {
        let store = Arc::new(EmbeddingStore::new("some-other-model", 8));
        let err = QueryService::new(store, extractor(), ImageLoader::new()).err().unwrap();
        assert_eq!(err.kind(), FaultKind::StoreUnavailable);
        assert!(!err.kind().is_client_fault());
    }

    #[test]
    fn test_open_missing_store() {
        let dir = TempDir::new().unwrap();
        let err = QueryService::open(dir.path().join("embeddings.csv"), extractor(), ImageLoader::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), FaultKind::StoreUnavailable);
    }

    #[test]
    fn test_dimension_mismatch_is_classified() {
        let extractor = extractor();
        let mut store = EmbeddingStore::new(extractor.identity(), 3);
        store.insert(1, &[1., 2., 3.]).unwrap();
        let err = QueryService::new(Arc::new(store), extractor, ImageLoader::new()).err().unwrap();
        assert_eq!(err.kind(), FaultKind::DimensionMismatch);
    }

    #[test]
    fn test_classification() {
        let degenerate: QueryError = RankError::DegenerateVector { id: None }.into();
        assert_eq!(degenerate.kind(), FaultKind::DegenerateVector);
        let extract: QueryError = ExtractError::Degenerate.into();
        assert_eq!(extract.kind(), FaultKind::ExtractionFailed);
        let store: QueryError = StoreError::MissingIdentity.into();
        assert_eq!(store.kind(), FaultKind::StoreUnavailable);
        assert_eq!(FaultKind::DegenerateVector.code(), "degenerate_vector");
    }
}
