use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, Opts, SearchOptions};
use crate::extractor::ConvExtractor;
use crate::loader::ImageLoader;
use crate::query::{QueryImage, QueryService};
use crate::ranker::Neighbor;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = self.search.store.clone().unwrap_or_else(|| opts.conf_dir.store());
        let extractor = Arc::new(ConvExtractor::new(&self.extractor));

        let result = block_in_place(|| -> Result<_> {
            let service = QueryService::open(&store, extractor, ImageLoader::new())?
                .with_default_count(self.search.count);
            Ok(service.search(QueryImage::Path(&self.image), None)?)
        })?;

        print_result(&result, &self.output_format)
    }
}

fn print_result(result: &[Neighbor], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for neighbor in result {
                println!("{:.4}\t{}", neighbor.distance, neighbor.id);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}
