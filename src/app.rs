//! 应用装配
//!
//! 读取配置、创建共享服务（master 仓库、项目流程、编排器），然后启动 HTTP 服务。

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::orchestrator::BatchOrchestrator;
use crate::services::MasterStore;
use crate::utils::logging::log_startup;
use crate::workflow::ProjectFlow;

/// 应用主结构
pub struct App {
    config: Config,
    state: Arc<ApiState>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        for dir in [&config.uploads_dir, &config.temp_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("无法创建目录 {}", dir.display()))?;
        }

        let master = Arc::new(MasterStore::new(&config.master_dir, &config.npm_bin));
        if !master.node_modules().exists() {
            warn!(
                "⚠️ {} 不存在，dynamic 项目链接依赖会失败并回退到本地安装",
                master.node_modules().display()
            );
        }

        let flow = Arc::new(ProjectFlow::from_config(&config, master)?);
        let orchestrator = BatchOrchestrator::new(
            flow,
            config.temp_dir.clone(),
            config.public_base_url.clone(),
            config.batch_size,
        );

        let state = Arc::new(ApiState {
            orchestrator,
            uploads_dir: config.uploads_dir.clone(),
        });

        Ok(Self { config, state })
    }

    /// 启动 HTTP 服务，直到进程退出
    pub async fn run(self) -> Result<()> {
        let router = api::router(self.state.clone(), &self.config.temp_dir);
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("无法监听 {}", self.config.listen_addr))?;

        info!("✓ 评分服务已启动: http://{}", self.config.listen_addr);
        axum::serve(listener, router).await?;
        Ok(())
    }
}
