use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use indicatif::ProgressStyle;
use regex::Regex;
use walkdir::WalkDir;

use crate::model::ModelId;

/// 进度条样式
pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap()
        .progress_chars("#>-")
}

/// 扫描图片目录，返回按路径排序的相对路径列表
///
/// 枚举顺序是确定的（按相对路径升序），保证重复构建得到逐位一致的索引。
///
/// 参数：
/// - dir: 图片目录
/// - suffix: 逗号分隔的文件后缀，比如 `jpg,png`
pub fn scan_images(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let re = Regex::new(&format!("(?i)^({})$", suffix.replace(',', "|")))?;

    let mut entries: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| {
            entry.ok().and_then(|entry| {
                let path = entry.path();
                if path.is_file()
                    && re.is_match(&path.extension().unwrap_or_default().to_string_lossy())
                {
                    // 存储相对路径标识符，由外部静态服务器负责解析
                    path.strip_prefix(dir).ok().map(|p| p.to_path_buf())
                } else {
                    None
                }
            })
        })
        .collect();

    if entries.is_empty() {
        bail!("目录 {} 中没有找到图片", dir.display());
    }

    entries.sort();
    Ok(entries)
}

/// 根据 (模型, 路径) 生成稳定的点 ID，格式为 UUID 字符串
///
/// 同一个键总是映射到同一个 ID，因此对远程存储的 upsert 是幂等的。
pub fn point_uuid(model: ModelId, path: &str) -> String {
    let hash = blake3::hash(format!("{}:{}", model.as_str(), path).as_bytes());
    let b = hash.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
        b[14], b[15]
    )
}
