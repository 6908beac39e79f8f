use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::ModelId;

/// 嵌入模型错误
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 模型加载失败，比如模型文件缺失或 ONNX 初始化失败
    #[error("模型 {model} 加载失败: {reason}")]
    Load { model: ModelId, reason: String },
    /// 输入不合法，比如空文本或无法解码的图片
    #[error("输入无法处理: {0}")]
    BadInput(String),
    /// 推理阶段失败
    #[error("模型推理失败: {0}")]
    Inference(String),
}

/// 扁平索引错误
#[derive(Debug, Error)]
pub enum IndexError {
    /// 索引工件不存在，需要先执行 build
    #[error("索引未构建: {}", .0.display())]
    NotBuilt(PathBuf),
    /// 向量数组和元数据表不一致，拒绝提供服务而不是悄悄截断
    #[error("索引已损坏: {0}")]
    Corrupt(String),
    /// 查询向量和索引的维数不一致
    #[error("向量维数不匹配: 期望 {expected}，实际 {got}")]
    DimMismatch { expected: usize, got: usize },
    #[error("索引 IO 失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("读取向量文件失败: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),
    #[error("写入向量文件失败: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),
    #[error("解析元数据失败: {0}")]
    Meta(#[from] serde_json::Error),
}

/// 远程向量数据库错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 连接、认证或超时类故障
    #[error("向量数据库不可用: {0}")]
    Unavailable(String),
    /// 服务端返回了无法理解的响应
    #[error("向量数据库响应异常: {0}")]
    BadResponse(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::BadResponse(err.to_string())
        }
    }
}

/// 单个模型检索管线的失败原因
///
/// 管线失败只会降级为该模型的空结果，绝不会中断整个请求。
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("检索超时（{0:?}）")]
    Timeout(Duration),
    #[error("该模型没有配置任何索引后端")]
    NoBackend,
}

/// 所有被请求的模型管线全部失败
#[derive(Debug, Error)]
#[error("所有模型的检索均失败")]
pub struct AllModelsFailed {
    /// 各模型的失败原因
    pub errors: Vec<(ModelId, String)>,
}

/// 迁移任务在重试耗尽后失败
///
/// `succeeded` 记录已经成功写入的条目数量。由于 upsert 按稳定键幂等，
/// 重新从头执行迁移不会产生重复数据。
#[derive(Debug, Error)]
#[error("迁移失败（已成功写入 {succeeded} 条）: {source}")]
pub struct MigrationError {
    pub succeeded: usize,
    #[source]
    pub source: StoreError,
}
