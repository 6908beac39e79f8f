use std::time::Duration;

use indicatif::ProgressBar;
use log::{info, warn};
use tokio::time::sleep;

use crate::error::{MigrationError, StoreError};
use crate::index::FlatIndex;
use crate::store::{StorePoint, VectorStore};
use crate::utils::{pb_style, point_uuid};

/// 把扁平索引批量迁移到远程向量数据库
///
/// 点 ID 由 (模型, 路径) 派生，upsert 幂等，因此迁移可以安全地从头重跑：
/// 失败后重跑不会产生重复点，也不需要断点续传。
pub struct Migrator {
    batch_size: usize,
    max_retries: usize,
    backoff: Duration,
}

impl Default for Migrator {
    fn default() -> Self {
        Self { batch_size: 100, max_retries: 3, backoff: Duration::from_millis(500) }
    }
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// 迁移一个模型的全部条目，返回写入的条目数
    ///
    /// 批次失败时按有限次数退避重试；重试耗尽后整个任务失败，
    /// 错误中带上已成功写入的条目数。
    pub async fn migrate<S: VectorStore>(
        &self,
        index: &FlatIndex,
        store: &S,
    ) -> Result<usize, MigrationError> {
        let model = index.model();
        store
            .ensure_collection(model, index.dim())
            .await
            .map_err(|source| MigrationError { succeeded: 0, source })?;

        let points: Vec<StorePoint> = index
            .iter()
            .map(|(entry, vector)| StorePoint {
                id: point_uuid(model, &entry.path),
                path: entry.path.clone(),
                vector: vector.to_vec(),
            })
            .collect();

        info!("迁移 {} 的 {} 个点，批大小 {}", model, points.len(), self.batch_size);
        let pb = ProgressBar::new(points.len() as u64)
            .with_style(pb_style())
            .with_message(format!("迁移 {} 中...", model));

        let mut succeeded = 0;
        for batch in points.chunks(self.batch_size) {
            self.upsert_with_retry(store, batch, index)
                .await
                .map_err(|source| MigrationError { succeeded, source })?;
            succeeded += batch.len();
            pb.inc(batch.len() as u64);
        }
        pb.finish_and_clear();

        info!("{} 迁移完成，共 {} 个点", model, succeeded);
        Ok(succeeded)
    }

    async fn upsert_with_retry<S: VectorStore>(
        &self,
        store: &S,
        batch: &[StorePoint],
        index: &FlatIndex,
    ) -> Result<(), StoreError> {
        let mut backoff = self.backoff;
        let mut attempt = 0;
        loop {
            match store.upsert(index.model(), batch).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!("批次写入失败（第 {} 次重试，{:?} 后）: {}", attempt, backoff, err);
                    sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
