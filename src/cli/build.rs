use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::encoder::EncoderRegistry;
use crate::index::IndexBuilder;
use crate::model::ModelId;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    /// 图片所在目录
    pub path: PathBuf,
    /// 参与构建的模型，默认为全部三个
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = ModelId::ALL)]
    pub models: Vec<ModelId>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
    /// 一次送入模型的图片数量
    #[arg(long, value_name = "SIZE", default_value_t = 32)]
    pub batch_size: usize,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let registry = EncoderRegistry::new(opts.data_dir.clone());

        for &model in &self.models {
            let encoder = registry.get(model).await?;
            let builder = IndexBuilder::new(opts.data_dir.clone())
                .batch_size(self.batch_size)
                .suffix(self.suffix.clone());
            let report = block_in_place(|| builder.build(&self.path, encoder.as_ref()))?;
            info!("{}: {} 张图片，代目 {}", report.model, report.images, report.generation);
        }

        info!("索引构建完成");
        Ok(())
    }
}
