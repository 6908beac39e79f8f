use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use prometheus::{BasicAuthentication, labels};
use tokio::net::TcpListener;
use tokio::task::spawn_blocking;
use tokio::time::sleep;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, QdrantOptions, SearchOptions};
use crate::encoder::EncoderRegistry;
use crate::index::FlatIndex;
use crate::searcher::Searcher;
use crate::server;
use crate::store::QdrantStore;

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub qdrant: QdrantOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
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
                Ok(index) => {
                    info!("模型 {} 的本地索引已加载，共 {} 条", model, index.len());
                    builder = builder.flat(index);
                }
                Err(e) => warn!("模型 {} 的本地索引不可用: {}", model, e),
            }
            if let Some(store) = &store {
                builder = builder.remote(model, store.clone());
            }
        }

        let qdrant_ok = match &store {
            Some(store) => store.ping().await,
            None => false,
        };
        if store.is_some() && !qdrant_ok {
            warn!("Qdrant 配置了但当前不可达，检索会回退到本地索引");
        }

        // 创建应用状态
        let state = server::AppState::new(builder.build(), self.search.models.clone(), qdrant_ok);

        // 创建应用
        let app = server::create_app(state);

        if let Some(url) = self.prometheus_push.clone() {
            let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
            let auth = self.prometheus_auth.clone().map(|s| {
                let (username, password) = s.split_once(':').unwrap();
                (username.to_string(), password.to_string())
            });
            tokio::spawn(async move {
                loop {
                    let metric_families = prometheus::gather();
                    let url = url.clone();
                    let instance = instance.clone();
                    let auth = auth.clone();
                    let r = spawn_blocking(move || {
                        prometheus::push_metrics(
                            "poisearch",
                            labels! {
                                "instance".to_string() => instance.clone(),
                            },
                            &url,
                            metric_families,
                            auth.map(|(username, password)| BasicAuthentication {
                                username,
                                password,
                            }),
                        )
                    })
                    .await
                    .unwrap();
                    if let Err(e) = r {
                        error!("推送指标失败: {e}");
                    }
                    sleep(Duration::from_secs(30)).await;
                }
            });
        }

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
