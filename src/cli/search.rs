use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::warn;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, QdrantOptions, SearchOptions};
use crate::encoder::EncoderRegistry;
use crate::index::FlatIndex;
use crate::model::ModelHits;
use crate::searcher::{Query, Searcher};
use crate::store::QdrantStore;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub qdrant: QdrantOptions,
    /// 查询文本
    #[arg(long, value_name = "TEXT", conflicts_with = "image", required_unless_present = "image")]
    pub text: Option<String>,
    /// 查询图片的路径
    #[arg(long, value_name = "FILE")]
    pub image: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let registry = Arc::new(EncoderRegistry::new(opts.data_dir.clone()));
        let store = match &self.qdrant.qdrant_url {
            Some(url) => Some(Arc::new(QdrantStore::new(
                url,
                self.qdrant.qdrant_api_key.clone(),
                &self.qdrant.collection_prefix,
            )?)),
            None => None,
        };

        let mut builder = Searcher::builder(registry)
            .timeout(Duration::from_secs(self.search.timeout))
            .top_k(self.search.top_k);
        for &model in &self.search.models {
            match FlatIndex::load(&opts.data_dir, model) {
                Ok(index) => builder = builder.flat(index),
                Err(e) => warn!("模型 {} 的本地索引不可用: {}", model, e),
            }
            if let Some(store) = &store {
                builder = builder.remote(model, store.clone());
            }
        }
        let searcher = builder.build();

        let query = match (&self.text, &self.image) {
            (Some(text), _) => Query::text(text.as_str()),
            (_, Some(path)) => Query::image(tokio::fs::read(path).await?),
            _ => unreachable!(),
        };

        let hits = searcher.search(&query, &self.search.models, None).await?;
        print_result(&hits, self)
    }
}

fn print_result(hits: &[ModelHits], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(hits)?)
        }
        OutputFormat::Table => {
            for hit in hits {
                match &hit.error {
                    Some(err) => println!("# {}: 失败（{}）", hit.model, err),
                    None => println!("# {}", hit.model),
                }
                for result in &hit.results {
                    println!("{:.4}\t{:.4}\t{}", result.score, result.raw_score, result.path);
                }
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}

impl FromStr for OutputFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            _ => unreachable!(),
        }
    }
}
