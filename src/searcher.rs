use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::warn;
use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::encoder::EncoderRegistry;
use crate::error::{AllModelsFailed, PipelineError, ProviderError};
use crate::index::FlatIndex;
use crate::metrics;
use crate::model::{ModelHits, ModelId, QueryKind, QueryResult};
use crate::store::{QdrantStore, VectorStore};

/// 一次检索的输入：文本或图片二选一
#[derive(Clone)]
pub enum Query {
    Text(String),
    Image(Arc<Vec<u8>>),
}

impl Query {
    pub fn text(text: impl Into<String>) -> Self {
        Query::Text(text.into())
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Query::Image(Arc::new(bytes))
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            Query::Text(_) => QueryKind::Text,
            Query::Image(_) => QueryKind::Image,
        }
    }
}

/// 单个模型的索引后端
///
/// 配置了远程存储时优先走远程，远程失败且本地索引可用时回退到本地。
struct ModelBackend<S> {
    remote: Option<Arc<S>>,
    flat: Option<Arc<FlatIndex>>,
}

impl<S> Default for ModelBackend<S> {
    fn default() -> Self {
        Self { remote: None, flat: None }
    }
}

/// 检索编排器
///
/// 把一次查询并发分发给各模型的独立管线（嵌入 → 索引查询 → 分数换算），
/// 每条管线有自己的超时；单条管线失败只会降级为该模型的空结果，
/// 只有所有被请求的模型全部失败时整个请求才失败。
///
/// 不同模型处于不同的嵌入空间，各模型的结果互相独立，绝不跨模型合并或重排。
pub struct Searcher<S: VectorStore = QdrantStore> {
    registry: Arc<EncoderRegistry>,
    backends: [ModelBackend<S>; 3],
    timeout: Duration,
    top_k: usize,
}

/// [`Searcher`] 的构建器
pub struct SearcherBuilder<S: VectorStore = QdrantStore> {
    registry: Arc<EncoderRegistry>,
    backends: [ModelBackend<S>; 3],
    timeout: Duration,
    top_k: usize,
}

impl<S: VectorStore> SearcherBuilder<S> {
    pub fn new(registry: Arc<EncoderRegistry>) -> Self {
        Self {
            registry,
            backends: Default::default(),
            timeout: Duration::from_secs(10),
            top_k: 5,
        }
    }

    /// 单条管线的超时时间
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 默认返回的结果数量
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// 为索引对应的模型挂载本地扁平索引
    pub fn flat(mut self, index: FlatIndex) -> Self {
        let slot = index.model().index();
        self.backends[slot].flat = Some(Arc::new(index));
        self
    }

    /// 为某个模型挂载远程存储
    pub fn remote(mut self, model: ModelId, store: Arc<S>) -> Self {
        self.backends[model.index()].remote = Some(store);
        self
    }

    pub fn build(self) -> Searcher<S> {
        Searcher {
            registry: self.registry,
            backends: self.backends,
            timeout: self.timeout,
            top_k: self.top_k,
        }
    }
}

impl<S: VectorStore + 'static> Searcher<S> {
    pub fn builder(registry: Arc<EncoderRegistry>) -> SearcherBuilder<S> {
        SearcherBuilder::new(registry)
    }

    /// 检索入口
    ///
    /// 返回的 `Vec<ModelHits>` 按请求的模型顺序排列，每个模型的结果
    /// 按展示分数严格降序。取消整个请求时所有在途管线一并取消；
    /// 已经开始的推理调用无法抢占，其结果在返回后被丢弃。
    pub async fn search(
        &self,
        query: &Query,
        models: &[ModelId],
        k: Option<usize>,
    ) -> Result<Vec<ModelHits>, AllModelsFailed> {
        let k = k.unwrap_or(self.top_k);

        let pipelines = models.iter().map(|&model| async move {
            let started = Instant::now();
            let result = match timeout(self.timeout, self.pipeline(model, query, k)).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout(self.timeout)),
            };
            metrics::observe_search(model, query.kind(), started.elapsed(), &result);
            (model, result)
        });

        let mut hits = Vec::with_capacity(models.len());
        let mut failed = 0;
        for (model, result) in join_all(pipelines).await {
            match result {
                Ok(results) => hits.push(ModelHits { model, results, error: None }),
                Err(err) => {
                    warn!("模型 {} 的检索管线失败: {}", model, err);
                    failed += 1;
                    hits.push(ModelHits {
                        model,
                        results: vec![],
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        if !hits.is_empty() && failed == hits.len() {
            return Err(AllModelsFailed {
                errors: hits
                    .into_iter()
                    .map(|h| (h.model, h.error.unwrap_or_default()))
                    .collect(),
            });
        }
        Ok(hits)
    }

    /// 单个模型的管线：嵌入 → 索引查询 → 换算展示分数
    async fn pipeline(
        &self,
        model: ModelId,
        query: &Query,
        k: usize,
    ) -> Result<Vec<QueryResult>, PipelineError> {
        let encoder = self.registry.get(model).await?;

        let query_clone = query.clone();
        let vector = spawn_blocking(move || match &query_clone {
            Query::Text(text) => encoder.embed_text(text),
            Query::Image(bytes) => encoder.embed_image(bytes),
        })
        .await
        .map_err(|e| PipelineError::Provider(ProviderError::Inference(e.to_string())))??;

        let raw = self.query_backend(model, vector, k).await?;

        let kind = query.kind();
        Ok(raw
            .into_iter()
            .map(|(path, raw_score)| QueryResult {
                path,
                score: model.display_score(kind, raw_score),
                raw_score,
            })
            .collect())
    }

    /// 查询某个模型配置的索引后端
    async fn query_backend(
        &self,
        model: ModelId,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<(String, f32)>, PipelineError> {
        let backend = &self.backends[model.index()];

        if let Some(remote) = &backend.remote {
            match remote.query(model, &vector, k).await {
                Ok(hits) => return Ok(hits),
                Err(err) if backend.flat.is_some() => {
                    warn!("模型 {} 的远程检索失败，回退到本地索引: {}", model, err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        match &backend.flat {
            Some(flat) => {
                let flat = flat.clone();
                let hits = spawn_blocking(move || flat.query(&vector, k))
                    .await
                    .map_err(|e| PipelineError::Provider(ProviderError::Inference(e.to_string())))??;
                Ok(hits)
            }
            None => Err(PipelineError::NoBackend),
        }
    }
}
