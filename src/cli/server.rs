use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, SearchOptions, positive_usize};
use crate::extractor::ConvExtractor;
use crate::loader::ImageLoader;
use crate::query::QueryService;
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 上传大小限制，单位为 MiB
    #[arg(long, value_name = "MIB", default_value_t = 10, value_parser = positive_usize())]
    pub body_limit: usize,
}

impl ServerCommand {
    /// 上传大小限制，单位为字节
    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit.saturating_mul(1024 * 1024)
    }
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = self.search.store.clone().unwrap_or_else(|| opts.conf_dir.store());
        let extractor = Arc::new(ConvExtractor::new(&self.extractor));

        // 向量库只在启动时加载一次
        let query = block_in_place(|| QueryService::open(&store, extractor, ImageLoader::new()))?
            .with_default_count(self.search.count);

        // 创建应用状态
        let state = server::AppState::new(query);

        // 创建应用
        let app = server::create_app(state, self.body_limit_bytes());

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
