use indicatif::ProgressStyle;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec} ETA {eta} {msg}",
    )
    .expect("进度条模板错误")
    .progress_chars("##-")
}

/// 格式化耗时，用于日志
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs_f32();
    if secs < 1. { format!("{:.1}ms", secs * 1000.) } else { format!("{:.2}s", secs) }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.5ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.50s");
    }
}
