use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::model::ModelId;

static DATA_DIR: LazyLock<DataDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "", "poisearch").expect("failed to get project dir");
    DataDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_data_dir() -> &'static str {
    DATA_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
#[command(name = "poisearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// poisearch 数据目录
    #[arg(short = 'c', long, default_value = default_data_dir())]
    pub data_dir: DataDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描图片目录，构建各模型的扁平索引
    Build(BuildCommand),
    /// 使用文本或图片查询索引
    Search(SearchCommand),
    /// 将扁平索引迁移到远程向量数据库
    Migrate(MigrateCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

/// 检索参数
#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 参与检索的模型，默认为全部三个
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = ModelId::ALL)]
    pub models: Vec<ModelId>,
    /// 每个模型返回的结果数量
    #[arg(short, long, value_name = "K", default_value_t = 5)]
    pub top_k: usize,
    /// 单个模型管线的超时时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub timeout: u64,
}

/// 远程向量数据库（Qdrant）连接参数
#[derive(Parser, Debug, Clone)]
pub struct QdrantOptions {
    /// Qdrant 服务地址，不填则只使用本地扁平索引
    #[arg(long, value_name = "URL", env = "QDRANT_URL")]
    pub qdrant_url: Option<String>,
    /// Qdrant API key
    #[arg(long, value_name = "KEY", env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,
    /// 集合名前缀，集合名为 `<前缀>_<模型>`
    #[arg(long, value_name = "PREFIX", default_value = "poi")]
    pub collection_prefix: String,
}

/// 数据目录布局
///
/// ```text
/// <data>/
///   index/<model>/CURRENT          当前生效的索引代目
///   index/<model>/gen-<hash>/      向量数组 + 元数据表
///   models/<model>/                用户提供的 ONNX 模型文件
///   models/fastembed/              内置模型的下载缓存
/// ```
#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 某个模型的索引目录
    pub fn index_dir(&self, model: ModelId) -> PathBuf {
        self.path.join("index").join(model.as_str())
    }

    /// 指向当前生效代目的指针文件
    pub fn current_file(&self, model: ModelId) -> PathBuf {
        self.index_dir(model).join("CURRENT")
    }

    /// 用户提供的 ONNX 模型目录
    pub fn model_dir(&self, model: ModelId) -> PathBuf {
        self.path.join("models").join(model.as_str())
    }

    /// 内置模型的下载缓存目录
    pub fn fastembed_cache(&self) -> PathBuf {
        self.path.join("models").join("fastembed")
    }
}

impl From<&Path> for DataDir {
    fn from(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
