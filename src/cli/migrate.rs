use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, QdrantOptions};
use crate::index::FlatIndex;
use crate::migrator::Migrator;
use crate::model::ModelId;
use crate::store::QdrantStore;

#[derive(Parser, Debug, Clone)]
pub struct MigrateCommand {
    /// 参与迁移的模型，默认为全部三个
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = ModelId::ALL)]
    pub models: Vec<ModelId>,
    #[command(flatten)]
    pub qdrant: QdrantOptions,
    /// 每批写入的点数量
    #[arg(long, value_name = "SIZE", default_value_t = 100)]
    pub batch_size: usize,
}

impl SubCommandExtend for MigrateCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let url = self
            .qdrant
            .qdrant_url
            .as_deref()
            .context("迁移需要指定 --qdrant-url 或设置 QDRANT_URL")?;
        let store = QdrantStore::new(
            url,
            self.qdrant.qdrant_api_key.clone(),
            &self.qdrant.collection_prefix,
        )?;
        let migrator = Migrator::new().batch_size(self.batch_size);

        for &model in &self.models {
            let index = FlatIndex::load(&opts.data_dir, model)?;
            let count = migrator.migrate(&index, &store).await?;
            info!("{}: 共迁移 {} 个点", model, count);
        }

        info!("迁移完成");
        Ok(())
    }
}
