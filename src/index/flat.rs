use std::fs;
use std::io::Cursor;

use ndarray::prelude::*;
use ndarray_npy::ReadNpyExt;
use serde::{Deserialize, Serialize};

use crate::config::DataDir;
use crate::error::IndexError;
use crate::knn::cosine_topk;
use crate::model::ModelId;

pub const VECTORS_FILE: &str = "vectors.npy";
pub const META_FILE: &str = "meta.json";

/// 元数据表中的一行，和向量数组按行号一一对应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// 图片的相对路径标识符，在同一个模型的语料中唯一
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
}

/// 索引元数据表
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexMeta {
    pub model: ModelId,
    pub dim: usize,
    /// 向量文件的 blake3 哈希，用于校验两个工件是否配对
    pub fingerprint: String,
    pub entries: Vec<IndexEntry>,
}

/// 内存中的扁平索引：稠密向量数组 + 对齐的元数据表
///
/// 构建完成后只读，重建通过发布新代目整体替换，从不原地修改。
#[derive(Debug)]
pub struct FlatIndex {
    model: ModelId,
    vectors: Array2<f32>,
    entries: Vec<IndexEntry>,
}

impl FlatIndex {
    /// 加载 CURRENT 指向的代目
    ///
    /// 在提供任何查询之前校验全部不变量：两个工件齐全、向量行数等于元数据
    /// 行数、维数一致、指纹配对。任何一条不满足都拒绝加载，绝不截断凑合。
    pub fn load(data_dir: &DataDir, model: ModelId) -> Result<Self, IndexError> {
        let index_dir = data_dir.index_dir(model);
        let current = data_dir.current_file(model);
        if !current.exists() {
            return Err(IndexError::NotBuilt(index_dir));
        }
        let generation = fs::read_to_string(&current)?.trim().to_string();
        let gen_dir = index_dir.join(&generation);
        let vectors_path = gen_dir.join(VECTORS_FILE);
        let meta_path = gen_dir.join(META_FILE);
        if !vectors_path.exists() || !meta_path.exists() {
            return Err(IndexError::Corrupt(format!("代目 {} 的工件缺失", generation)));
        }

        let vector_bytes = fs::read(&vectors_path)?;
        let meta: IndexMeta = serde_json::from_slice(&fs::read(&meta_path)?)?;

        let fingerprint = blake3::hash(&vector_bytes).to_hex().to_string();
        if fingerprint != meta.fingerprint {
            return Err(IndexError::Corrupt(format!(
                "向量数组和元数据表不配对: {} != {}",
                fingerprint, meta.fingerprint
            )));
        }

        let vectors = Array2::<f32>::read_npy(Cursor::new(vector_bytes))?;
        if vectors.nrows() != meta.entries.len() {
            return Err(IndexError::Corrupt(format!(
                "向量数组 {} 行，元数据表 {} 行",
                vectors.nrows(),
                meta.entries.len()
            )));
        }
        if vectors.ncols() != meta.dim {
            return Err(IndexError::Corrupt(format!(
                "向量维数 {}，元数据声明 {}",
                vectors.ncols(),
                meta.dim
            )));
        }

        Ok(Self { model, vectors, entries: meta.entries })
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    /// 精确余弦相似度 top-k 查询，返回 (路径, 原始相似度)
    ///
    /// 结果按相似度严格降序，相似度并列时按插入顺序，长度为 min(k, 条目数)。
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        if vector.len() != self.dim() {
            return Err(IndexError::DimMismatch { expected: self.dim(), got: vector.len() });
        }
        let query = ArrayView1::from(vector);
        Ok(cosine_topk(query, self.vectors.view(), k)
            .into_iter()
            .map(|(i, score)| (self.entries[i].path.clone(), score))
            .collect())
    }

    /// 按行迭代 (条目, 向量)，迁移任务使用
    pub fn iter(&self) -> impl Iterator<Item = (&IndexEntry, ArrayView1<'_, f32>)> {
        self.entries.iter().zip(self.vectors.rows())
    }
}
