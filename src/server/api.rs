use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum_typed_multipart::TypedMultipart;
use log::info;
use serde_json::{Value, json};

use super::error::{BadRequest, Result};
use super::state::AppState;
use super::types::*;
use crate::model::{ModelHits, ModelId};
use crate::searcher::Query;

/// 服务信息
#[utoipa::path(get, path = "/")]
pub async fn root_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": "poisearch API is running",
        "models": state.models,
        "qdrant": state.qdrant,
    }))
}

/// 文本检索
#[utoipa::path(
    post,
    path = "/search/text",
    request_body = SearchTextRequest,
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_text_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<SearchTextRequest>,
) -> Result<Json<Value>> {
    let models = match &data.models {
        Some(names) => parse_models(names.iter().map(String::as_str))?,
        None => state.models.clone(),
    };

    let start = Instant::now();
    info!("文本检索: {}", data.query);

    let query = Query::text(data.query.as_str());
    let hits = state.searcher.search(&query, &models, data.top_k).await?;

    Ok(Json(render_hits(start, hits)))
}

/// 图片检索
#[utoipa::path(
    post,
    path = "/search/image",
    request_body(content = SearchImageForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_image_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<SearchImageRequest>,
) -> Result<Json<Value>> {
    if data.file.is_empty() {
        return Err(BadRequest("上传的图片为空".to_string()).into());
    }
    let models = match &data.models {
        Some(csv) => parse_models(csv.split(',').map(str::trim))?,
        None => state.models.clone(),
    };

    let start = Instant::now();
    info!("图片检索，{} 字节", data.file.len());

    let query = Query::image(data.file.to_vec());
    let hits = state.searcher.search(&query, &models, data.top_k).await?;

    Ok(Json(render_hits(start, hits)))
}

/// 解析请求中的模型标识符列表
fn parse_models<'a>(names: impl Iterator<Item = &'a str>) -> Result<Vec<ModelId>> {
    let mut models = Vec::new();
    for name in names {
        let model = name.parse::<ModelId>().map_err(BadRequest)?;
        if !models.contains(&model) {
            models.push(model);
        }
    }
    if models.is_empty() {
        return Err(BadRequest("模型列表为空".to_string()).into());
    }
    Ok(models)
}

/// 把编排器的结果渲染为接口响应
///
/// 接口层保持原始实现的映射结构：模型标识符到结果列表，失败的模型
/// 结果为空并在 errors 中附上原因。
fn render_hits(start: Instant, hits: Vec<ModelHits>) -> Value {
    let mut results = serde_json::Map::new();
    let mut errors = serde_json::Map::new();
    for hit in hits {
        if let Some(err) = &hit.error {
            errors.insert(hit.model.as_str().to_string(), Value::String(err.clone()));
        }
        results.insert(
            hit.model.as_str().to_string(),
            serde_json::to_value(&hit.results).unwrap_or_default(),
        );
    }
    json!({
        "time": start.elapsed().as_millis() as u64,
        "results": results,
        "errors": errors,
    })
}
