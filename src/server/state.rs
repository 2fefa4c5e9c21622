use std::sync::Arc;

use crate::query::QueryService;

/// 应用状态
pub struct AppState {
    /// 查询服务，启动时加载一次，请求之间共享
    pub query: QueryService,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(query: QueryService) -> Arc<Self> {
        Arc::new(AppState { query })
    }
}
