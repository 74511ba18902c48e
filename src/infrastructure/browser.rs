use std::path::PathBuf;

use crate::error::{AppResult, BrowserError};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::page_driver::PageDriver;

/// 浏览器启动参数
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub chrome_executable: Option<PathBuf>,
}

/// 无头浏览器实例
///
/// 持有 Browser 与其事件循环任务；一次截图调用只启动一个实例，结束时 `close()`。
pub struct HeadlessBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl HeadlessBrowser {
    /// 启动无头浏览器
    pub async fn launch(options: &BrowserOptions) -> AppResult<Self> {
        info!("🚀 启动无头浏览器...");

        let viewport = Viewport {
            width: options.viewport_width,
            height: options.viewport_height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: false,
            has_touch: false,
        };

        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .viewport(viewport)
            .window_size(options.viewport_width, options.viewport_height)
            .args(vec![
                "--disable-gpu",
                "--no-sandbox",              // 容器内运行时没有沙盒权限
                "--disable-dev-shm-usage",   // 防止共享内存不足
                "--hide-scrollbars",
                "--font-render-hinting=none",
            ]);
        if let Some(path) = &options.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(|e| {
            error!("配置无头浏览器失败: {}", e);
            BrowserError::ConfigurationFailed(e)
        })?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            error!("启动无头浏览器失败: {}", e);
            BrowserError::LaunchFailed(e)
        })?;
        debug!("无头浏览器启动成功");

        // 在后台处理浏览器事件
        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        // 添加短暂延迟以等待浏览器状态同步
        sleep(tokio::time::Duration::from_millis(300)).await;

        Ok(Self {
            browser,
            handler_task,
        })
    }

    /// 打开一个空白页面
    pub async fn new_page(&self) -> AppResult<PageDriver> {
        let page = self.browser.new_page("about:blank").await.map_err(|e| {
            error!("创建页面失败: {}", e);
            BrowserError::PageCreationFailed(e)
        })?;
        Ok(PageDriver::new(page))
    }

    /// 关闭浏览器并回收进程；失败只记录日志
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("关闭浏览器失败: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("等待浏览器进程退出失败: {}", e);
        }
        self.handler_task.abort();
        debug!("无头浏览器已关闭");
    }
}
