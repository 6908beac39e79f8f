use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use indicatif::ProgressBar;
use log::{debug, info};
use ndarray::prelude::*;
use ndarray_npy::WriteNpyExt;

use crate::config::DataDir;
use crate::encoder::Encoder;
use crate::index::flat::{IndexEntry, IndexMeta, META_FILE, VECTORS_FILE};
use crate::model::ModelId;
use crate::utils::{pb_style, scan_images};

/// 扁平索引构建器
///
/// 全量重建：扫描语料目录、批量计算嵌入、发布为新的索引代目。
/// 同一个目标语料同时只允许一个构建者。
pub struct IndexBuilder {
    data_dir: DataDir,
    batch_size: usize,
    suffix: String,
}

/// 一次构建的结果
#[derive(Debug)]
pub struct BuildReport {
    pub model: ModelId,
    pub images: usize,
    pub generation: String,
}

impl IndexBuilder {
    pub fn new(data_dir: DataDir) -> Self {
        Self { data_dir, batch_size: 32, suffix: "jpg,jpeg,png,webp".to_string() }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// 构建某个模型的索引
    ///
    /// 图片按相对路径排序后逐批编码，行号即元数据表的行号，
    /// 因此对同一份语料重复构建得到逐位一致的工件。
    pub fn build(&self, corpus_dir: &Path, encoder: &dyn Encoder) -> Result<BuildReport> {
        let model = encoder.model();
        let entries = scan_images(corpus_dir, &self.suffix)?;
        info!("共 {} 张图片，开始计算 {} 嵌入", entries.len(), model);

        let dim = encoder.dim();
        let pb = ProgressBar::new(entries.len() as u64)
            .with_style(pb_style())
            .with_message(format!("计算 {} 嵌入中...", model));

        let mut flat = Vec::with_capacity(entries.len() * dim);
        for batch in entries.chunks(self.batch_size) {
            let paths: Vec<PathBuf> = batch.iter().map(|p| corpus_dir.join(p)).collect();
            let embeddings = encoder.embed_image_files(&paths)?;
            for embedding in &embeddings {
                ensure!(
                    embedding.len() == dim,
                    "嵌入维数不一致: 期望 {}，实际 {}",
                    dim,
                    embedding.len()
                );
                flat.extend_from_slice(embedding);
            }
            pb.inc(batch.len() as u64);
        }
        pb.finish_and_clear();

        let vectors = Array2::from_shape_vec((entries.len(), dim), flat)?;
        let paths = entries
            .iter()
            // 路径分隔符统一为 /，保证跨平台的标识符一致
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect();

        let generation = self.publish(model, &vectors, paths)?;
        info!("{} 索引构建完成，代目 {}", model, generation);

        Ok(BuildReport { model, images: entries.len(), generation })
    }

    /// 发布新代目
    ///
    /// 向量数组和元数据表先完整写入按内容寻址的代目目录，再通过
    /// 写临时文件加原子改名的方式替换 CURRENT 指针。两个工件随一次改名
    /// 同时生效；构建中途被杀死时 CURRENT 不变，旧索引保持完整可查。
    fn publish(&self, model: ModelId, vectors: &Array2<f32>, paths: Vec<String>) -> Result<String> {
        let mut npy = Vec::new();
        vectors.write_npy(&mut npy)?;
        let fingerprint = blake3::hash(&npy).to_hex().to_string();
        let generation = format!("gen-{}", &fingerprint[..16]);

        let index_dir = self.data_dir.index_dir(model);
        let gen_dir = index_dir.join(&generation);
        fs::create_dir_all(&gen_dir)
            .with_context(|| format!("创建代目目录 {} 失败", gen_dir.display()))?;
        fs::write(gen_dir.join(VECTORS_FILE), &npy)?;

        let meta = IndexMeta {
            model,
            dim: vectors.ncols(),
            fingerprint,
            entries: paths.into_iter().map(|path| IndexEntry { path, attributes: None }).collect(),
        };
        fs::write(gen_dir.join(META_FILE), serde_json::to_vec(&meta)?)?;

        let tmp = index_dir.join("CURRENT.tmp");
        fs::write(&tmp, &generation)?;
        fs::rename(&tmp, self.data_dir.current_file(model))?;

        self.cleanup_stale(&index_dir, &generation);
        Ok(generation)
    }

    /// 删除不再被 CURRENT 引用的旧代目
    fn cleanup_stale(&self, index_dir: &Path, current: &str) {
        let Ok(read_dir) = fs::read_dir(index_dir) else {
            return;
        };
        for entry in read_dir.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("gen-") && name != current {
                debug!("清理旧代目 {}", name);
                let _ = fs::remove_dir_all(entry.path());
            }
        }
    }
}
