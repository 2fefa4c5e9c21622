use std::sync::LazyLock;

use prometheus::*;

use crate::builder::SkipReason;
use crate::query::FaultKind;

static METRIC_QUERY_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imretrieve_query_count", "count of queries by outcome", &["outcome"])
        .expect("failed to register imretrieve_query_count")
});

static METRIC_QUERY_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imretrieve_query_duration",
        "duration of the per-image query in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1., 2.5, 5.]
    )
    .expect("failed to register imretrieve_query_duration")
});

static METRIC_BUILD_SKIPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imretrieve_build_skipped",
        "count of records skipped while building the store",
        &["reason"]
    )
    .expect("failed to register imretrieve_build_skipped")
});

/// 记录一次查询的结果，`fault` 为 None 表示成功
pub fn inc_query(fault: Option<FaultKind>) {
    let outcome = fault.map_or("ok", FaultKind::code);
    METRIC_QUERY_COUNT.with_label_values(&[outcome]).inc();
}

pub fn observe_query_duration(seconds: f64) {
    METRIC_QUERY_DURATION.observe(seconds);
}

pub fn inc_build_skipped(reason: &SkipReason) {
    let reason = match reason {
        SkipReason::InvalidImage(_) => "invalid_image",
        SkipReason::Extraction(_) => "extraction",
    };
    METRIC_BUILD_SKIPPED.with_label_values(&[reason]).inc();
}

/// 以 Prometheus 文本格式导出全部指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&gather()).unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_exported() {
        inc_query(None);
        inc_query(Some(FaultKind::InvalidInput));
        inc_build_skipped(&SkipReason::InvalidImage("x".into()));
        observe_query_duration(0.02);

        let text = gather_text();
        assert!(text.contains("imretrieve_query_count{outcome=\"ok\"}"));
        assert!(text.contains("imretrieve_query_count{outcome=\"invalid_input\"}"));
        assert!(text.contains("imretrieve_build_skipped{reason=\"invalid_image\"}"));
        assert!(text.contains("imretrieve_query_duration_bucket"));
    }
}
