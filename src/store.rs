use std::future::Future;
use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::error::StoreError;
use crate::model::ModelId;

/// 写入远程存储的一个点
#[derive(Debug, Clone)]
pub struct StorePoint {
    /// 稳定的点 ID，由 (模型, 路径) 派生，见 [`crate::utils::point_uuid`]
    pub id: String,
    pub path: String,
    pub vector: Vec<f32>,
}

/// 远程向量存储的统一接口
///
/// 检索编排器和迁移任务都只依赖这个接口，具体实现是 [`QdrantStore`]。
pub trait VectorStore: Send + Sync {
    /// 确保某个模型的集合存在，维数和距离度量在创建时固定
    fn ensure_collection(
        &self,
        model: ModelId,
        dim: usize,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 幂等写入一批点
    ///
    /// 点按 ID 定位，重复写入同一个 ID 原地覆盖，不会累积重复点。
    /// 不同 ID 的并发写入互不影响；同一个 ID 的并发写入为后写胜出。
    fn upsert(
        &self,
        model: ModelId,
        points: &[StorePoint],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 服务端 top-k 相似度检索，返回 (路径, 原始分数)，按分数降序
    fn query(
        &self,
        model: ModelId,
        vector: &[f32],
        k: usize,
    ) -> impl Future<Output = Result<Vec<(String, f32)>, StoreError>> + Send;
}

/// Qdrant REST 客户端
///
/// 每个模型一个集合，集合名为 `<前缀>_<模型>`，距离度量为余弦相似度，
/// 点的 payload 只存图片路径。
pub struct QdrantStore {
    client: reqwest::Client,
    base: String,
    api_key: Option<String>,
    prefix: String,
}

impl QdrantStore {
    pub fn new(url: &str, api_key: Option<String>, prefix: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base: url.trim_end_matches('/').to_string(),
            api_key,
            prefix: prefix.to_string(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.base, path));
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    /// 探测服务是否可达
    pub async fn ping(&self) -> bool {
        match self.request(reqwest::Method::GET, "/collections").send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn collection(&self, model: ModelId) -> String {
        model.collection(&self.prefix)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(StoreError::Unavailable(format!("认证失败 ({}): {}", status, body)))
    } else {
        Err(StoreError::BadResponse(format!("{}: {}", status, body)))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<PointPayload>,
}

#[derive(Deserialize)]
struct PointPayload {
    #[serde(default)]
    path: Option<String>,
}

impl VectorStore for QdrantStore {
    fn ensure_collection(
        &self,
        model: ModelId,
        dim: usize,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            let name = self.collection(model);
            let resp = self
                .request(reqwest::Method::GET, &format!("/collections/{}", name))
                .send()
                .await
                .map_err(StoreError::from)?;
            if resp.status().is_success() {
                return Ok(());
            }
            if resp.status() != StatusCode::NOT_FOUND {
                check_status(resp).await?;
                return Ok(());
            }

            debug!("创建集合 {}，维数 {}", name, dim);
            let resp = self
                .request(reqwest::Method::PUT, &format!("/collections/{}", name))
                .json(&json!({
                    "vectors": { "size": dim, "distance": "Cosine" }
                }))
                .send()
                .await
                .map_err(StoreError::from)?;
            check_status(resp).await?;
            Ok(())
        }
    }

    fn upsert(
        &self,
        model: ModelId,
        points: &[StorePoint],
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            let name = self.collection(model);
            let body = json!({
                "points": points
                    .iter()
                    .map(|p| json!({
                        "id": p.id,
                        "vector": p.vector,
                        "payload": { "path": p.path },
                    }))
                    .collect::<Vec<_>>(),
            });
            let resp = self
                .request(reqwest::Method::PUT, &format!("/collections/{}/points?wait=true", name))
                .json(&body)
                .send()
                .await
                .map_err(StoreError::from)?;
            check_status(resp).await?;
            Ok(())
        }
    }

    fn query(
        &self,
        model: ModelId,
        vector: &[f32],
        k: usize,
    ) -> impl Future<Output = Result<Vec<(String, f32)>, StoreError>> + Send {
        async move {
            let name = self.collection(model);
            let resp = self
                .request(reqwest::Method::POST, &format!("/collections/{}/points/search", name))
                .json(&json!({
                    "vector": vector,
                    "limit": k,
                    "with_payload": true,
                }))
                .send()
                .await
                .map_err(StoreError::from)?;
            let resp = check_status(resp).await?;
            let parsed: SearchResponse = resp.json().await.map_err(StoreError::from)?;

            parsed
                .result
                .into_iter()
                .map(|point| {
                    let path = point
                        .payload
                        .and_then(|p| p.path)
                        .ok_or_else(|| StoreError::BadResponse("点缺少 path 字段".to_string()))?;
                    Ok((path, point.score))
                })
                .collect()
        }
    }
}
