//! 按余弦距离对向量库排序
//!
//! 余弦距离只与向量方向有关，与提取器输出的向量长度无关。
//! 距离相同的条目保持向量库中的顺序。

use serde::Serialize;
use thiserror::Error;

use crate::store::EmbeddingStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RankError {
    #[error("向量维度不符: 需要 {expected}，实际为 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{} 是零向量或包含非有限值，无法计算余弦距离", describe(.id))]
    DegenerateVector {
        /// 向量库中的 ID，查询向量为 None
        id: Option<i64>,
    },
}

fn describe(id: &Option<i64>) -> String {
    match id {
        Some(id) => format!("向量库中的 {id}"),
        None => "查询向量".to_string(),
    }
}

/// 一条排序结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: i64,
    pub distance: f32,
}

/// 在 f64 下累加，避免高维向量的精度损失
fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

fn norm(a: &[f32]) -> f64 {
    dot(a, a).sqrt()
}

/// 零向量或包含 NaN/Inf 的向量没有方向
fn is_degenerate(norm: f64) -> bool {
    norm == 0. || !norm.is_finite()
}

/// 舍入误差可能让结果略微超出 [0, 2]，这里截断
fn distance_from(dot: f64, norm_a: f64, norm_b: f64) -> f32 {
    (1. - dot / (norm_a * norm_b)).clamp(0., 2.) as f32
}

/// 余弦距离 `1 - a·b / (|a||b|)`，取值范围 [0, 2]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, RankError> {
    if a.len() != b.len() {
        return Err(RankError::DimensionMismatch { expected: a.len(), actual: b.len() });
    }
    let (norm_a, norm_b) = (norm(a), norm(b));
    if is_degenerate(norm_a) || is_degenerate(norm_b) {
        return Err(RankError::DegenerateVector { id: None });
    }
    Ok(distance_from(dot(a, b), norm_a, norm_b))
}

/// 返回与查询向量距离最近的 `n` 个条目，按距离升序排列
///
/// * 向量库为空时返回空列表
/// * `n` 为 0 时返回空列表（维度仍会检查），`n` 超过向量库大小时返回全部条目
/// * 距离相同时保持向量库的迭代顺序
pub fn rank(query: &[f32], store: &EmbeddingStore, n: usize) -> Result<Vec<Neighbor>, RankError> {
    if store.is_empty() {
        return Ok(vec![]);
    }
    if query.len() != store.dimension() {
        return Err(RankError::DimensionMismatch {
            expected: store.dimension(),
            actual: query.len(),
        });
    }
    if n == 0 {
        return Ok(vec![]);
    }
    let query_norm = norm(query);
    if is_degenerate(query_norm) {
        return Err(RankError::DegenerateVector { id: None });
    }

    let mut neighbors = store
        .iter()
        .map(|(id, vector)| {
            let vector_norm = norm(vector);
            if is_degenerate(vector_norm) {
                return Err(RankError::DegenerateVector { id: Some(id) });
            }
            Ok(Neighbor { id, distance: distance_from(dot(query, vector), query_norm, vector_norm) })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // sort_by 是稳定排序
    neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    neighbors.truncate(n);
    Ok(neighbors)
}

/// 同 [`rank`]，只返回 ID
pub fn rank_ids(query: &[f32], store: &EmbeddingStore, n: usize) -> Result<Vec<i64>, RankError> {
    Ok(rank(query, store, n)?.into_iter().map(|neighbor| neighbor.id).collect())
}
