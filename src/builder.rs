use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::dataset::ImageRecord;
use crate::extractor::{Embedding, FeatureExtractor, validate_embedding};
use crate::loader::{ImageLoader, Loaded};
use crate::metrics;
use crate::store::EmbeddingStore;
use crate::utils::{format_duration, pb_style};

/// 建库时某条记录被跳过的原因，不会中断建库
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("图片无效: {0}")]
    InvalidImage(String),
    #[error("计算向量失败: {0}")]
    Extraction(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedRecord {
    pub id: i64,
    pub reason: SkipReason,
}

/// 建库结果统计
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BuildSummary {
    /// 处理的记录数
    pub attempted: usize,
    /// 成功计算向量的记录数，重复的 ID 会被多次计数
    pub succeeded: usize,
    pub skipped: Vec<SkippedRecord>,
}

impl BuildSummary {
    pub fn skipped_ids(&self) -> Vec<i64> {
        self.skipped.iter().map(|s| s.id).collect()
    }
}

/// 为一组图片计算向量并组成向量库
///
/// 向量在线程池中并行计算，计算结果按输入顺序由单个线程写入向量库，
/// 因此结果与线程数无关。重复的 ID 以最后一条成功的记录为准。
pub struct StoreBuilder {
    extractor: Arc<dyn FeatureExtractor>,
    loader: ImageLoader,
    threads: usize,
    progress: bool,
}

impl StoreBuilder {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, loader: ImageLoader) -> Self {
        Self { extractor, loader, threads: num_cpus::get(), progress: false }
    }

    /// 并行计算的线程数，0 表示使用全部 CPU
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = if threads == 0 { num_cpus::get() } else { threads };
        self
    }

    /// 是否显示进度条
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn embed_record(&self, record: &ImageRecord) -> Result<Embedding, SkipReason> {
        let image = match self.loader.check(&record.local_path) {
            Loaded::Image(image) => image,
            Loaded::Invalid(reason) => return Err(SkipReason::InvalidImage(reason)),
        };
        let embedding = self
            .extractor
            .embed_image(&image)
            .map_err(|e| SkipReason::Extraction(e.to_string()))?;
        validate_embedding(&embedding, self.extractor.dimension())
            .map_err(|e| SkipReason::Extraction(e.to_string()))?;
        Ok(embedding)
    }

    pub fn build(&self, records: &[ImageRecord]) -> Result<(EmbeddingStore, BuildSummary)> {
        info!("开始计算向量，共 {} 张图片，{} 个线程", records.len(), self.threads);
        info!("提取器: {}", self.extractor.identity());
        let start = Instant::now();

        let pb = if self.progress {
            ProgressBar::new(records.len() as u64).with_style(pb_style())
        } else {
            ProgressBar::hidden()
        };

        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.threads).build()?;
        let results = pool.install(|| {
            records
                .par_iter()
                .progress_with(pb.clone())
                .map(|record| self.embed_record(record))
                .collect::<Vec<_>>()
        });
        pb.finish_and_clear();

        let mut store = EmbeddingStore::new(self.extractor.identity(), self.extractor.dimension());
        let mut summary = BuildSummary { attempted: records.len(), ..Default::default() };
        for (record, result) in records.iter().zip(results) {
            let inserted = result.and_then(|embedding| {
                store
                    .insert(record.id, &embedding)
                    .map_err(|e| SkipReason::Extraction(e.to_string()))
            });
            match inserted {
                Ok(_) => summary.succeeded += 1,
                Err(reason) => {
                    warn!("跳过 {} ({}): {}", record.id, record.local_path.display(), reason);
                    metrics::inc_build_skipped(&reason);
                    summary.skipped.push(SkippedRecord { id: record.id, reason });
                }
            }
        }

        info!(
            "向量计算完成: 成功 {}，跳过 {}，向量库共 {} 条，耗时 {}",
            summary.succeeded,
            summary.skipped.len(),
            store.len(),
            format_duration(start.elapsed())
        );
        Ok((store, summary))
    }
}
