use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio::task::spawn_blocking;

use crate::config::DataDir;
use crate::encoder::{Encoder, FastEncoder};
use crate::error::ProviderError;
use crate::model::ModelId;

/// 编码器注册表，由组合根（CLI 命令或服务器状态）持有
///
/// 每个模型对应一个固定槽位，首次使用时惰性加载，加载由 `OnceCell` 保证
/// 只执行一次：并发的首批调用者只会触发一次加载，其余调用者等待同一结果。
/// 加载完成后的编码器只读，按引用共享给所有并发请求。
pub struct EncoderRegistry {
    data_dir: DataDir,
    cells: [OnceCell<Arc<dyn Encoder>>; 3],
}

impl EncoderRegistry {
    pub fn new(data_dir: DataDir) -> Self {
        Self { data_dir, cells: [OnceCell::new(), OnceCell::new(), OnceCell::new()] }
    }

    /// 预置一个编码器，用于服务启动时的预热和测试注入
    pub fn preset(self, encoder: Arc<dyn Encoder>) -> Self {
        let index = encoder.model().index();
        // 重复预置同一个模型时保留第一个
        let _ = self.cells[index].set(encoder);
        self
    }

    /// 获取某个模型的编码器，必要时触发一次性加载
    ///
    /// 加载失败不会被缓存，下一次调用会重新尝试。
    pub async fn get(&self, model: ModelId) -> Result<Arc<dyn Encoder>, ProviderError> {
        let cell = &self.cells[model.index()];
        cell.get_or_try_init(|| {
            let data_dir = self.data_dir.clone();
            async move {
                spawn_blocking(move || {
                    FastEncoder::load(model, &data_dir).map(|e| Arc::new(e) as Arc<dyn Encoder>)
                })
                .await
                .map_err(|e| ProviderError::Load { model, reason: e.to_string() })?
            }
        })
        .await
        .cloned()
    }
}
