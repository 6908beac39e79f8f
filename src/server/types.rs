use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::Deserialize;
use utoipa::ToSchema;

/// 文本检索请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchTextRequest {
    /// 查询文本
    pub query: String,
    /// 参与检索的模型标识符，不填则使用全部模型
    pub models: Option<Vec<String>>,
    /// 每个模型返回的结果数量
    pub top_k: Option<usize>,
}

/// 图片检索请求参数
#[derive(TryFromMultipart)]
pub struct SearchImageRequest {
    pub file: Bytes,
    pub models: Option<String>,
    pub top_k: Option<usize>,
}

/// 图片检索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchImageForm {
    /// 上传的查询图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 逗号分隔的模型标识符，不填则使用全部模型
    pub models: Option<String>,
    /// 每个模型返回的结果数量
    pub top_k: Option<usize>,
}

/// 检索响应
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchResponse {
    /// 检索耗时，单位为毫秒
    pub time: u32,
    /// 模型标识符到结果列表的映射，列表按展示分数降序
    pub results: std::collections::HashMap<String, Vec<crate::model::QueryResult>>,
    /// 失败模型的错误信息
    pub errors: std::collections::HashMap<String, String>,
}
