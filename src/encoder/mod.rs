mod clip;
mod registry;

use std::path::PathBuf;

pub use clip::FastEncoder;
pub use registry::EncoderRegistry;

use crate::error::ProviderError;
use crate::model::ModelId;

/// 嵌入模型的统一接口
///
/// 实现必须是确定性的：相同输入总是产生相同向量。输出向量已做 L2 归一化，
/// 长度等于 [`Encoder::dim`]。
pub trait Encoder: Send + Sync {
    /// 该编码器对应的模型
    fn model(&self) -> ModelId;

    /// 输出向量的维数
    fn dim(&self) -> usize;

    /// 将文本编码为归一化向量
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// 将图片字节编码为归一化向量
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, ProviderError>;

    /// 批量编码图片文件，构建索引时使用
    ///
    /// 默认实现逐个读取文件后调用 [`Encoder::embed_image`]，
    /// 具体实现可以覆盖为真正的批量推理。
    fn embed_image_files(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, ProviderError> {
        paths
            .iter()
            .map(|path| {
                let bytes = std::fs::read(path)
                    .map_err(|e| ProviderError::BadInput(format!("{}: {}", path.display(), e)))?;
                self.embed_image(&bytes)
            })
            .collect()
    }
}
