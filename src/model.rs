use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 支持的嵌入模型
///
/// 三个模型各自占据独立的嵌入空间，维数固定，互相之间的分数不可比较。
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ModelId {
    /// CLIP ViT-B/32
    BaseClip,
    /// CLIP ViT-L/14
    EnhancedClipL,
    /// SigLIP2 base
    Siglip2,
}

impl ModelId {
    /// 全部模型，按固定顺序排列
    pub const ALL: [ModelId; 3] = [ModelId::BaseClip, ModelId::EnhancedClipL, ModelId::Siglip2];

    /// 接口中使用的模型标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::BaseClip => "base_clip",
            ModelId::EnhancedClipL => "enhanced_clip_l",
            ModelId::Siglip2 => "siglip2",
        }
    }

    /// 模型的嵌入维数
    pub fn dim(&self) -> usize {
        match self {
            ModelId::BaseClip => 512,
            ModelId::EnhancedClipL => 768,
            ModelId::Siglip2 => 768,
        }
    }

    /// 模型在固定数组中的下标
    pub fn index(&self) -> usize {
        match self {
            ModelId::BaseClip => 0,
            ModelId::EnhancedClipL => 1,
            ModelId::Siglip2 => 2,
        }
    }

    /// 远程向量数据库中该模型对应的集合名
    pub fn collection(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.as_str())
    }

    /// 将原始余弦相似度换算为展示分数
    ///
    /// 换算函数按模型和查询类型固定：
    /// - CLIP 系列，文本查询：`min(0.99, raw * 2.5 + 0.1)`
    /// - CLIP 系列，图片查询：`min(0.99, raw * 1.5)`
    /// - SigLIP2：不做换算，`score == raw_score`
    ///
    /// 所有换算在 [-1, 1] 上单调不减，因此不影响排序。
    pub fn display_score(&self, kind: QueryKind, raw: f32) -> f32 {
        match (self, kind) {
            (ModelId::Siglip2, _) => raw,
            (_, QueryKind::Text) => (raw * 2.5 + 0.1).min(0.99),
            (_, QueryKind::Image) => (raw * 1.5).min(0.99),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base_clip" => Ok(ModelId::BaseClip),
            "enhanced_clip_l" => Ok(ModelId::EnhancedClipL),
            "siglip2" => Ok(ModelId::Siglip2),
            _ => Err(format!("未知模型: {}", s)),
        }
    }
}

/// 查询类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Text,
    Image,
}

/// 单条检索结果
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryResult {
    /// 图片的相对路径标识符，由外部静态服务器解析为实际图片
    pub path: String,
    /// 展示分数，见 [`ModelId::display_score`]
    pub score: f32,
    /// 索引返回的原始相似度，余弦相似度时范围为 [-1, 1]
    pub raw_score: f32,
}

/// 单个模型的检索结果
///
/// `results` 按 `score` 严格降序排列；管线失败时 `results` 为空且
/// `error` 记录失败原因。
#[derive(Debug, Clone, Serialize)]
pub struct ModelHits {
    pub model: ModelId,
    pub results: Vec<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
