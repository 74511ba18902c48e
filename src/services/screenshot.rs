//! 截图服务 - 业务能力层
//!
//! 用无头浏览器依次打开每个路由，等待网络空闲、冻结动画后截取整页 PNG。
//! 单个路由失败只记录日志，不影响其余路由；浏览器在调用结束时总会关闭。

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::{BrowserOptions, HeadlessBrowser, PageDriver};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// 关闭过渡/动画并隐藏输入光标，消除与时间相关的画面差异
const FREEZE_CSS: &str = "*, *::before, *::after { transition: none !important; animation: none !important; caret-color: transparent !important; }";

/// 截图参数
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub browser: BrowserOptions,
    pub settle_delay: Duration,
    pub network_idle: Duration,
    pub navigation_timeout: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            browser: BrowserOptions {
                viewport_width: config.viewport_width,
                viewport_height: config.viewport_height,
                chrome_executable: config.chrome_executable.clone(),
            },
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            network_idle: Duration::from_millis(config.network_idle_ms),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        }
    }
}

/// 单个路由的截图结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCapture {
    pub route: String,
    pub path: PathBuf,
    pub captured: bool,
}

/// 截图服务
pub struct ScreenshotCapturer {
    settings: CaptureSettings,
}

impl ScreenshotCapturer {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }

    /// 截取 `base_url` 下每个路由，文件写入 `out_dir`
    pub async fn capture(
        &self,
        base_url: &str,
        routes: &[String],
        out_dir: &Path,
        tag: &str,
    ) -> AppResult<Vec<RouteCapture>> {
        tokio::fs::create_dir_all(out_dir).await?;
        let browser = HeadlessBrowser::launch(&self.settings.browser).await?;

        let mut results = Vec::with_capacity(routes.len());
        for route in routes {
            let url = format!("{}{}", base_url, route);
            let path = out_dir.join(route_file_name(route));

            let captured = match self.capture_route(&browser, &url, &path, tag).await {
                Ok(()) => true,
                Err(e) => {
                    error!("[{}] ❌ 截图失败 {}: {}", tag, url, e);
                    false
                }
            };
            results.push(RouteCapture {
                route: route.clone(),
                path,
                captured,
            });
        }

        browser.close().await;
        Ok(results)
    }

    async fn capture_route(
        &self,
        browser: &HeadlessBrowser,
        url: &str,
        path: &Path,
        tag: &str,
    ) -> AppResult<()> {
        info!("[{}] 📸 打开 {}", tag, url);
        let page = browser.new_page().await?;
        let result = self.shoot(&page, url, path, tag).await;
        if let Err(e) = page.close().await {
            warn!("[{}] 关闭页面失败: {}", tag, e);
        }
        result
    }

    async fn shoot(&self, page: &PageDriver, url: &str, path: &Path, tag: &str) -> AppResult<()> {
        let network = page.watch_network().await?;
        page.navigate(url, self.settings.navigation_timeout).await?;

        let idle = network
            .wait_for_idle(self.settings.network_idle, self.settings.navigation_timeout)
            .await;
        if !idle {
            warn!("[{}] 网络在超时前未空闲，继续截图", tag);
        }

        page.inject_style(FREEZE_CSS).await?;
        sleep(self.settings.settle_delay).await;

        page.save_full_page_png(path).await
    }
}

/// 路由对应的截图文件名：`/` → index.png，其余去掉斜杠
pub fn route_file_name(route: &str) -> String {
    if route == "/" {
        "index.png".to_string()
    } else {
        format!("{}.png", route.replace('/', ""))
    }
}

/// 路由在报告中的显示名
pub fn route_display_name(route: &str) -> String {
    if route == "/" {
        "Home Page".to_string()
    } else {
        route.replace('/', "")
    }
}
