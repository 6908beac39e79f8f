use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions,
    ImageInitOptionsUserDefined, InitOptions, InitOptionsUserDefined, TextEmbedding,
    TokenizerFiles, UserDefinedEmbeddingModel, UserDefinedImageEmbeddingModel,
};
use log::info;

use crate::config::DataDir;
use crate::encoder::Encoder;
use crate::error::ProviderError;
use crate::knn::l2_normalize;
use crate::model::ModelId;

/// fastembed 实现的编码器，同时持有文本和视觉两个 ONNX 会话
///
/// `base_clip` 使用 fastembed 内置的 CLIP ViT-B/32，首次加载时下载到缓存目录；
/// `enhanced_clip_l` 和 `siglip2` 从数据目录下的模型目录加载用户提供的 ONNX 文件：
///
/// ```text
/// models/<model>/
///   textual.onnx               文本塔
///   visual.onnx                视觉塔
///   tokenizer.json
///   config.json
///   special_tokens_map.json
///   tokenizer_config.json
///   preprocessor_config.json
/// ```
///
/// 加载后的会话只读，可在多个并发请求之间共享。
pub struct FastEncoder {
    model: ModelId,
    text: TextEmbedding,
    image: ImageEmbedding,
}

impl FastEncoder {
    pub fn load(model: ModelId, data_dir: &DataDir) -> Result<Self, ProviderError> {
        match model {
            ModelId::BaseClip => Self::load_builtin(model, data_dir),
            ModelId::EnhancedClipL | ModelId::Siglip2 => Self::load_user_defined(model, data_dir),
        }
    }

    fn load_builtin(model: ModelId, data_dir: &DataDir) -> Result<Self, ProviderError> {
        let cache = data_dir.fastembed_cache();
        info!("加载内置模型 {}，缓存目录 {}", model, cache.display());

        let text = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::ClipVitB32).with_cache_dir(cache.clone()),
        )
        .map_err(|e| load_err(model, e))?;
        let image = ImageEmbedding::try_new(
            ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32).with_cache_dir(cache),
        )
        .map_err(|e| load_err(model, e))?;

        Ok(Self { model, text, image })
    }

    fn load_user_defined(model: ModelId, data_dir: &DataDir) -> Result<Self, ProviderError> {
        let dir = data_dir.model_dir(model);
        info!("从 {} 加载模型 {}", dir.display(), model);

        let tokenizer_files = TokenizerFiles {
            tokenizer_file: read_model_file(model, &dir, "tokenizer.json")?,
            config_file: read_model_file(model, &dir, "config.json")?,
            special_tokens_map_file: read_model_file(model, &dir, "special_tokens_map.json")?,
            tokenizer_config_file: read_model_file(model, &dir, "tokenizer_config.json")?,
        };
        let text_model = UserDefinedEmbeddingModel::new(
            read_model_file(model, &dir, "textual.onnx")?,
            tokenizer_files,
        );
        let text =
            TextEmbedding::try_new_from_user_defined(text_model, InitOptionsUserDefined::default())
                .map_err(|e| load_err(model, e))?;

        let image_model = UserDefinedImageEmbeddingModel::new(
            read_model_file(model, &dir, "visual.onnx")?,
            read_model_file(model, &dir, "preprocessor_config.json")?,
        );
        let image = ImageEmbedding::try_new_from_user_defined(
            image_model,
            ImageInitOptionsUserDefined::default(),
        )
        .map_err(|e| load_err(model, e))?;

        Ok(Self { model, text, image })
    }

    fn check_dim(&self, mut embedding: Vec<f32>) -> Result<Vec<f32>, ProviderError> {
        if embedding.len() != self.dim() {
            return Err(ProviderError::Inference(format!(
                "模型 {} 输出维数 {}，期望 {}",
                self.model,
                embedding.len(),
                self.dim()
            )));
        }
        // 有的模型配置不带归一化层，此处统一归一化
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl Encoder for FastEncoder {
    fn model(&self) -> ModelId {
        self.model
    }

    fn dim(&self) -> usize {
        self.model.dim()
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::BadInput("查询文本为空".to_string()));
        }
        let mut out = self
            .text
            .embed(vec![text], None)
            .map_err(|e| ProviderError::Inference(e.to_string()))?;
        let embedding = out
            .pop()
            .ok_or_else(|| ProviderError::Inference("模型没有返回向量".to_string()))?;
        self.check_dim(embedding)
    }

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, ProviderError> {
        if bytes.is_empty() {
            return Err(ProviderError::BadInput("图片内容为空".to_string()));
        }
        // fastembed 的图片接口按路径读取，先落到临时文件
        let mut file = tempfile::NamedTempFile::new()
            .map_err(|e| ProviderError::Inference(e.to_string()))?;
        file.write_all(bytes).map_err(|e| ProviderError::Inference(e.to_string()))?;

        let mut out = self
            .image
            .embed(vec![file.path()], None)
            .map_err(|e| ProviderError::BadInput(e.to_string()))?;
        let embedding = out
            .pop()
            .ok_or_else(|| ProviderError::Inference("模型没有返回向量".to_string()))?;
        self.check_dim(embedding)
    }

    fn embed_image_files(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let out = self
            .image
            .embed(paths.to_vec(), None)
            .map_err(|e| ProviderError::BadInput(e.to_string()))?;
        if out.len() != paths.len() {
            return Err(ProviderError::Inference(format!(
                "批量编码返回 {} 个向量，期望 {}",
                out.len(),
                paths.len()
            )));
        }
        out.into_iter().map(|e| self.check_dim(e)).collect()
    }
}

fn read_model_file(model: ModelId, dir: &Path, name: &str) -> Result<Vec<u8>, ProviderError> {
    fs::read(dir.join(name)).map_err(|e| ProviderError::Load {
        model,
        reason: format!("{}: {}", dir.join(name).display(), e),
    })
}

fn load_err(model: ModelId, err: impl std::fmt::Display) -> ProviderError {
    ProviderError::Load { model, reason: err.to_string() }
}
