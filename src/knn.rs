use std::cmp::Ordering;

use ndarray::prelude::*;

/// 对向量做 L2 归一化，零向量保持不变
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// 计算查询向量和矩阵每一行的余弦相似度，返回相似度最高的 k 个 (行号, 相似度)
///
/// 所有向量都已归一化，余弦相似度等价于点积。结果按相似度严格降序排列，
/// 相似度相同时按行号升序，保证结果稳定可复现。
///
/// 参数：
/// - query: 归一化的查询向量
/// - vectors: 每行一个归一化向量的矩阵
/// - k: 返回的最近邻居数量，结果长度为 min(k, 行数)
pub fn cosine_topk(query: ArrayView1<f32>, vectors: ArrayView2<f32>, k: usize) -> Vec<(usize, f32)> {
    let scores = vectors.dot(&query);
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| {
        scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal).then(a.cmp(&b))
    });
    indices.truncate(k);
    indices.into_iter().map(|i| (i, scores[i])).collect()
}
