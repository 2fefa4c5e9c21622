use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use tokio::task::block_in_place;

use crate::builder::{BuildSummary, StoreBuilder};
use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::{ExtractorOptions, Opts};
use crate::dataset::read_dataset;
use crate::extractor::ConvExtractor;
use crate::loader::ImageLoader;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    /// 数据集 CSV 文件，需要包含 id 与 url 两列
    pub dataset: PathBuf,
    /// 图片目录，默认为配置目录下的 images
    #[arg(long, value_name = "DIR")]
    pub images: Option<PathBuf>,
    /// 向量库输出路径，默认为配置目录下的 embeddings.csv
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// 计算向量的线程数，0 表示使用全部 CPU
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub threads: usize,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let images = self.images.clone().unwrap_or_else(|| opts.conf_dir.images());
        let output = self.output.clone().unwrap_or_else(|| opts.conf_dir.store());

        let records = read_dataset(&self.dataset, &images)?;
        if records.is_empty() {
            warn!("数据集 {} 中没有记录", self.dataset.display());
        }

        let extractor = Arc::new(ConvExtractor::new(&self.extractor));
        let builder = StoreBuilder::new(extractor, ImageLoader::new()).threads(self.threads).progress(true);
        let (store, summary) = block_in_place(|| builder.build(&records))?;

        store
            .save(&output)
            .with_context(|| format!("无法保存向量库 {}", output.display()))?;

        print_summary(&summary, &self.output_format)
    }
}

fn print_summary(summary: &BuildSummary, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?)
        }
        OutputFormat::Table => {
            println!("attempted\t{}", summary.attempted);
            println!("succeeded\t{}", summary.succeeded);
            println!("skipped\t{}", summary.skipped.len());
            for skipped in &summary.skipped {
                println!("{}\t{}", skipped.id, skipped.reason);
            }
        }
    }
    Ok(())
}
