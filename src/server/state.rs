use std::sync::Arc;

use crate::model::ModelId;
use crate::searcher::Searcher;

/// 应用状态
pub struct AppState {
    /// 检索编排器
    pub searcher: Searcher,
    /// 启动时可用的模型列表
    pub models: Vec<ModelId>,
    /// 是否配置了远程向量数据库
    pub qdrant: bool,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(searcher: Searcher, models: Vec<ModelId>, qdrant: bool) -> Arc<Self> {
        Arc::new(AppState { searcher, models, qdrant })
    }
}
