use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use poisearch::config::DataDir;
use poisearch::encoder::{Encoder, EncoderRegistry};
use poisearch::error::{IndexError, ProviderError, StoreError};
use poisearch::index::{FlatIndex, IndexBuilder, META_FILE, VECTORS_FILE};
use poisearch::knn::l2_normalize;
use poisearch::migrator::Migrator;
use poisearch::model::ModelId;
use poisearch::searcher::{Query, Searcher};
use poisearch::store::{StorePoint, VectorStore};
use poisearch::utils::point_uuid;
use rstest::rstest;
use tempfile::TempDir;

/// 确定性的测试编码器：向量由输入内容的 blake3 哈希派生
struct StubEncoder {
    model: ModelId,
    dim: usize,
    fail: bool,
    delay: Option<Duration>,
}

impl StubEncoder {
    fn new(model: ModelId, dim: usize) -> Self {
        Self { model, dim, fail: false, delay: None }
    }

    fn failing(model: ModelId, dim: usize) -> Self {
        Self { model, dim, fail: true, delay: None }
    }

    fn slow(model: ModelId, dim: usize, delay: Duration) -> Self {
        Self { model, dim, fail: false, delay: Some(delay) }
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<f32>, ProviderError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            return Err(ProviderError::Inference("注入的推理故障".to_string()));
        }
        Ok(seed_vector(self.dim, data))
    }
}

impl Encoder for StubEncoder {
    fn model(&self) -> ModelId {
        self.model
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.encode(text.as_bytes())
    }

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, ProviderError> {
        self.encode(bytes)
    }
}

fn seed_vector(dim: usize, data: &[u8]) -> Vec<f32> {
    let hash = blake3::hash(data);
    let mut v: Vec<f32> = hash
        .as_bytes()
        .iter()
        .cycle()
        .take(dim)
        .enumerate()
        .map(|(i, &b)| (b as f32 + i as f32) / 255.0 - 0.5)
        .collect();
    l2_normalize(&mut v);
    v
}

/// 内存版的远程向量存储，点按 ID 存放
#[derive(Default)]
struct MockStore {
    collections: Mutex<HashMap<ModelId, usize>>,
    points: Mutex<HashMap<(ModelId, String), StorePoint>>,
    upsert_calls: Mutex<usize>,
    /// 从第 N 次（0 起算）upsert 调用开始全部失败
    fail_upserts_from: Mutex<Option<usize>>,
    query_fails: AtomicBool,
}

impl MockStore {
    fn point_count(&self, model: ModelId) -> usize {
        self.points.lock().unwrap().keys().filter(|(m, _)| *m == model).count()
    }

    fn fail_upserts_from(&self, n: usize) {
        *self.fail_upserts_from.lock().unwrap() = Some(n);
    }

    fn heal(&self) {
        *self.fail_upserts_from.lock().unwrap() = None;
    }
}

impl VectorStore for MockStore {
    fn ensure_collection(
        &self,
        model: ModelId,
        dim: usize,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            self.collections.lock().unwrap().insert(model, dim);
            Ok(())
        }
    }

    fn upsert(
        &self,
        model: ModelId,
        points: &[StorePoint],
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            {
                let mut calls = self.upsert_calls.lock().unwrap();
                let index = *calls;
                *calls += 1;
                if let Some(from) = *self.fail_upserts_from.lock().unwrap() {
                    if index >= from {
                        return Err(StoreError::Unavailable("注入的存储故障".to_string()));
                    }
                }
            }
            let mut guard = self.points.lock().unwrap();
            for point in points {
                guard.insert((model, point.id.clone()), point.clone());
            }
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
            if self.query_fails.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("注入的存储故障".to_string()));
            }
            let guard = self.points.lock().unwrap();
            let mut hits: Vec<(String, f32)> = guard
                .iter()
                .filter(|((m, _), _)| *m == model)
                .map(|(_, p)| {
                    let score = p.vector.iter().zip(vector).map(|(a, b)| a * b).sum::<f32>();
                    (p.path.clone(), score)
                })
                .collect();
            hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            hits.truncate(k);
            Ok(hits)
        }
    }
}

const IMAGES: [(&str, &[u8]); 3] =
    [("a.jpg", b"content-a"), ("b.jpg", b"content-b"), ("c.jpg", b"content-c")];

fn make_corpus(dir: &Path) {
    for (name, content) in IMAGES {
        fs::write(dir.join(name), content).unwrap();
    }
}

fn build_flat(data_dir: &DataDir, corpus: &Path, model: ModelId, dim: usize) -> FlatIndex {
    let encoder = StubEncoder::new(model, dim);
    IndexBuilder::new(data_dir.clone()).build(corpus, &encoder).unwrap();
    FlatIndex::load(data_dir, model).unwrap()
}

fn setup() -> (TempDir, DataDir, TempDir) {
    let data = TempDir::new().unwrap();
    let corpus = TempDir::new().unwrap();
    make_corpus(corpus.path());
    let data_dir = DataDir::from(data.path());
    (data, data_dir, corpus)
}

// ==================== 扁平索引 ====================

#[test]
fn build_is_deterministic() {
    let (_data, data_dir, corpus) = setup();
    let encoder = StubEncoder::new(ModelId::BaseClip, 16);

    let r1 = IndexBuilder::new(data_dir.clone()).build(corpus.path(), &encoder).unwrap();
    let bytes1 = fs::read(
        data_dir.index_dir(ModelId::BaseClip).join(&r1.generation).join(VECTORS_FILE),
    )
    .unwrap();

    let r2 = IndexBuilder::new(data_dir.clone()).build(corpus.path(), &encoder).unwrap();
    let bytes2 = fs::read(
        data_dir.index_dir(ModelId::BaseClip).join(&r2.generation).join(VECTORS_FILE),
    )
    .unwrap();

    // 同一份语料重复构建，代目和向量逐位一致
    assert_eq!(r1.generation, r2.generation);
    assert_eq!(bytes1, bytes2);
}

#[rstest]
#[case::all(5, 3)]
#[case::truncated(2, 2)]
fn query_known_embedding(#[case] k: usize, #[case] expected: usize) {
    let (_data, data_dir, corpus) = setup();
    let index = build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);
    assert_eq!(index.len(), 3);

    // 用 b.jpg 自己的嵌入查询，b.jpg 必须排第一且相似度约等于 1
    let query = StubEncoder::new(ModelId::BaseClip, 16).embed_image(b"content-b").unwrap();
    let hits = index.query(&query, k).unwrap();

    assert_eq!(hits.len(), expected);
    assert_eq!(hits[0].0, "b.jpg");
    assert!((hits[0].1 - 1.0).abs() < 1e-5);
    for pair in hits.windows(2) {
        assert!(pair[0].1 >= pair[1].1);
    }
}

#[test]
fn query_rejects_dim_mismatch() {
    let (_data, data_dir, corpus) = setup();
    let index = build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);
    let err = index.query(&vec![0.0; 8], 3).unwrap_err();
    assert!(matches!(err, IndexError::DimMismatch { expected: 16, got: 8 }));
}

#[test]
fn load_rejects_row_mismatch() {
    let (_data, data_dir, corpus) = setup();
    build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);

    // 从元数据表中去掉一行，行数和向量数组对不上
    let generation =
        fs::read_to_string(data_dir.current_file(ModelId::BaseClip)).unwrap().trim().to_string();
    let meta_path = data_dir.index_dir(ModelId::BaseClip).join(&generation).join(META_FILE);
    let mut meta: serde_json::Value =
        serde_json::from_slice(&fs::read(&meta_path).unwrap()).unwrap();
    meta["entries"].as_array_mut().unwrap().pop();
    fs::write(&meta_path, serde_json::to_vec(&meta).unwrap()).unwrap();

    let err = FlatIndex::load(&data_dir, ModelId::BaseClip).unwrap_err();
    assert!(matches!(err, IndexError::Corrupt(_)));
}

#[test]
fn load_rejects_unpaired_vectors() {
    let (_data, data_dir, corpus) = setup();
    build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);

    // 向量文件被换掉后指纹对不上元数据表
    let generation =
        fs::read_to_string(data_dir.current_file(ModelId::BaseClip)).unwrap().trim().to_string();
    let vectors_path = data_dir.index_dir(ModelId::BaseClip).join(&generation).join(VECTORS_FILE);
    let mut bytes = fs::read(&vectors_path).unwrap();
    bytes.extend_from_slice(b"garbage");
    fs::write(&vectors_path, bytes).unwrap();

    let err = FlatIndex::load(&data_dir, ModelId::BaseClip).unwrap_err();
    assert!(matches!(err, IndexError::Corrupt(_)));
}

#[test]
fn load_not_built() {
    let data = TempDir::new().unwrap();
    let err = FlatIndex::load(&DataDir::from(data.path()), ModelId::BaseClip).unwrap_err();
    assert!(matches!(err, IndexError::NotBuilt(_)));
}

#[test]
fn killed_build_leaves_published_index_intact() {
    let (_data, data_dir, corpus) = setup();
    build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);

    // 模拟构建中途被杀死：残留一个写了一半的代目目录，CURRENT 没有更新
    let stale = data_dir.index_dir(ModelId::BaseClip).join("gen-deadbeefdeadbeef");
    fs::create_dir_all(&stale).unwrap();
    fs::write(stale.join(VECTORS_FILE), b"partial").unwrap();

    let index = FlatIndex::load(&data_dir, ModelId::BaseClip).unwrap();
    assert_eq!(index.len(), 3);
}

#[test]
fn rebuild_publishes_new_generation() {
    let (_data, data_dir, corpus) = setup();
    let encoder = StubEncoder::new(ModelId::BaseClip, 16);
    let r1 = IndexBuilder::new(data_dir.clone()).build(corpus.path(), &encoder).unwrap();

    fs::write(corpus.path().join("d.jpg"), b"content-d").unwrap();
    let r2 = IndexBuilder::new(data_dir.clone()).build(corpus.path(), &encoder).unwrap();

    assert_ne!(r1.generation, r2.generation);
    // 旧代目在发布后被清理
    assert!(!data_dir.index_dir(ModelId::BaseClip).join(&r1.generation).exists());

    let index = FlatIndex::load(&data_dir, ModelId::BaseClip).unwrap();
    assert_eq!(index.len(), 4);
}

// ==================== 检索编排 ====================

fn registry_with(data_dir: &DataDir, encoders: Vec<StubEncoder>) -> Arc<EncoderRegistry> {
    let mut registry = EncoderRegistry::new(data_dir.clone());
    for encoder in encoders {
        registry = registry.preset(Arc::new(encoder));
    }
    Arc::new(registry)
}

#[tokio::test]
async fn search_partial_failure_degrades() {
    let (_data, data_dir, corpus) = setup();
    let mut builder = Searcher::<MockStore>::builder(registry_with(
        &data_dir,
        vec![
            StubEncoder::new(ModelId::BaseClip, 16),
            StubEncoder::failing(ModelId::EnhancedClipL, 24),
            StubEncoder::new(ModelId::Siglip2, 32),
        ],
    ));
    for (model, dim) in [(ModelId::BaseClip, 16), (ModelId::EnhancedClipL, 24), (ModelId::Siglip2, 32)] {
        builder = builder.flat(build_flat(&data_dir, corpus.path(), model, dim));
    }
    let searcher = builder.build();

    let hits = searcher.search(&Query::text("红色外套"), &ModelId::ALL, None).await.unwrap();

    assert_eq!(hits.len(), 3);
    for hit in &hits {
        if hit.model == ModelId::EnhancedClipL {
            assert!(hit.results.is_empty());
            assert!(hit.error.as_ref().unwrap().contains("推理"));
        } else {
            assert_eq!(hit.results.len(), 3);
            assert!(hit.error.is_none());
            for pair in hit.results.windows(2) {
                assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}

#[tokio::test]
async fn search_all_failed() {
    let (_data, data_dir, _corpus) = setup();
    let searcher = Searcher::<MockStore>::builder(registry_with(
        &data_dir,
        vec![
            StubEncoder::failing(ModelId::BaseClip, 16),
            StubEncoder::failing(ModelId::EnhancedClipL, 16),
            StubEncoder::failing(ModelId::Siglip2, 16),
        ],
    ))
    .build();

    let err = searcher.search(&Query::text("查询"), &ModelId::ALL, None).await.unwrap_err();
    assert_eq!(err.errors.len(), 3);
}

#[tokio::test]
async fn search_timeout_degrades_single_pipeline() {
    let (_data, data_dir, corpus) = setup();
    let mut builder = Searcher::<MockStore>::builder(registry_with(
        &data_dir,
        vec![
            StubEncoder::new(ModelId::BaseClip, 16),
            StubEncoder::slow(ModelId::Siglip2, 32, Duration::from_millis(500)),
        ],
    ))
    .timeout(Duration::from_millis(100));
    for (model, dim) in [(ModelId::BaseClip, 16), (ModelId::Siglip2, 32)] {
        builder = builder.flat(build_flat(&data_dir, corpus.path(), model, dim));
    }
    let searcher = builder.build();

    let hits = searcher
        .search(&Query::text("查询"), &[ModelId::BaseClip, ModelId::Siglip2], None)
        .await
        .unwrap();

    let slow = hits.iter().find(|h| h.model == ModelId::Siglip2).unwrap();
    assert!(slow.results.is_empty());
    assert!(slow.error.as_ref().unwrap().contains("超时"));

    let fast = hits.iter().find(|h| h.model == ModelId::BaseClip).unwrap();
    assert_eq!(fast.results.len(), 3);
}

#[tokio::test]
async fn search_without_backend_fails_per_model() {
    let (_data, data_dir, _corpus) = setup();
    let searcher = Searcher::<MockStore>::builder(registry_with(
        &data_dir,
        vec![StubEncoder::new(ModelId::BaseClip, 16)],
    ))
    .build();

    let err = searcher.search(&Query::text("查询"), &[ModelId::BaseClip], None).await.unwrap_err();
    assert_eq!(err.errors.len(), 1);
    assert!(err.errors[0].1.contains("后端"));
}

#[tokio::test]
async fn search_image_query_uses_image_rescale() {
    let (_data, data_dir, corpus) = setup();
    let index = build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);
    let searcher = Searcher::<MockStore>::builder(registry_with(
        &data_dir,
        vec![StubEncoder::new(ModelId::BaseClip, 16)],
    ))
    .flat(index)
    .build();

    let hits = searcher
        .search(&Query::image(b"content-b".to_vec()), &[ModelId::BaseClip], Some(1))
        .await
        .unwrap();

    let result = &hits[0].results[0];
    assert_eq!(result.path, "b.jpg");
    assert!((result.raw_score - 1.0).abs() < 1e-5);
    // 图片查询的展示分数换算: min(0.99, raw * 1.5)
    assert!((result.score - 0.99).abs() < 1e-6);
}

#[tokio::test]
async fn search_falls_back_to_flat_when_remote_fails() {
    let (_data, data_dir, corpus) = setup();
    let store = Arc::new(MockStore::default());
    store.query_fails.store(true, Ordering::SeqCst);

    let index = build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);
    let searcher = Searcher::builder(registry_with(
        &data_dir,
        vec![StubEncoder::new(ModelId::BaseClip, 16)],
    ))
    .flat(index)
    .remote(ModelId::BaseClip, store)
    .build();

    let hits = searcher.search(&Query::text("查询"), &[ModelId::BaseClip], None).await.unwrap();
    assert_eq!(hits[0].results.len(), 3);
    assert!(hits[0].error.is_none());
}

// ==================== 迁移 ====================

#[tokio::test]
async fn migrate_is_idempotent() {
    let (_data, data_dir, corpus) = setup();
    let index = build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);
    let store = MockStore::default();
    let migrator = Migrator::new().batch_size(2);

    assert_eq!(migrator.migrate(&index, &store).await.unwrap(), 3);
    assert_eq!(migrator.migrate(&index, &store).await.unwrap(), 3);

    // 两次迁移后仍然是 N 个点，不是 2N
    assert_eq!(store.point_count(ModelId::BaseClip), 3);
    assert_eq!(*store.collections.lock().unwrap().get(&ModelId::BaseClip).unwrap(), 16);
}

#[tokio::test]
async fn migrate_reports_succeeded_count_and_rerun_converges() {
    let (_data, data_dir, corpus) = setup();
    let index = build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);
    let store = MockStore::default();
    let migrator = Migrator::new().batch_size(1).max_retries(1).backoff(Duration::from_millis(1));

    // 第一批成功，第二批连同重试一起失败，任务报告已成功的条目数
    store.fail_upserts_from(1);
    let err = migrator.migrate(&index, &store).await.unwrap_err();
    assert_eq!(err.succeeded, 1);
    assert_eq!(store.point_count(ModelId::BaseClip), 1);

    // 故障恢复后从头重跑，收敛到恰好 N 个点
    store.heal();
    assert_eq!(migrator.migrate(&index, &store).await.unwrap(), 3);
    assert_eq!(store.point_count(ModelId::BaseClip), 3);
}

#[tokio::test]
async fn remote_query_after_migration() {
    let (_data, data_dir, corpus) = setup();
    let index = build_flat(&data_dir, corpus.path(), ModelId::BaseClip, 16);
    let store = Arc::new(MockStore::default());
    Migrator::new().migrate(&index, store.as_ref()).await.unwrap();

    // 只配置远程后端，结果完全来自远程存储
    let searcher = Searcher::builder(registry_with(
        &data_dir,
        vec![StubEncoder::new(ModelId::BaseClip, 16)],
    ))
    .remote(ModelId::BaseClip, store)
    .build();

    let hits = searcher
        .search(&Query::image(b"content-c".to_vec()), &[ModelId::BaseClip], Some(2))
        .await
        .unwrap();
    assert_eq!(hits[0].results.len(), 2);
    assert_eq!(hits[0].results[0].path, "c.jpg");
}

#[test]
fn point_ids_are_stable_per_model() {
    let a1 = point_uuid(ModelId::BaseClip, "faces/x.jpg");
    let a2 = point_uuid(ModelId::BaseClip, "faces/x.jpg");
    let b = point_uuid(ModelId::Siglip2, "faces/x.jpg");
    assert_eq!(a1, a2);
    assert_ne!(a1, b);
}
