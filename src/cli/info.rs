use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde_json::json;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::Opts;
use crate::store::EmbeddingStore;

#[derive(Parser, Debug, Clone)]
pub struct InfoCommand {
    /// 向量库文件路径，默认为配置目录下的 embeddings.csv
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for InfoCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let path = self.store.clone().unwrap_or_else(|| opts.conf_dir.store());
        // 不检查提取器标识，没有标识的旧文件也可以查看
        let store = EmbeddingStore::load(&path, None)?;
        let identity = if store.identity().is_empty() { "<untagged>" } else { store.identity() };

        match self.output_format {
            OutputFormat::Json => {
                let info = json!({
                    "path": path,
                    "identity": identity,
                    "dimension": store.dimension(),
                    "entries": store.len(),
                });
                println!("{}", serde_json::to_string_pretty(&info)?)
            }
            OutputFormat::Table => {
                println!("path\t{}", path.display());
                println!("identity\t{identity}");
                println!("dimension\t{}", store.dimension());
                println!("entries\t{}", store.len());
            }
        }
        Ok(())
    }
}
