//! 页面驱动 - 基础设施层
//!
//! 持有唯一的 Page 资源，只暴露"导航 / 监听网络 / 执行 JS / 注入样式 / 截图"能力

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, AppResult, BrowserError};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value as JsonValue;
use tracing::debug;

/// 一条网络事件，只保留请求 ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkActivity {
    Started(String),
    Settled(String),
}

/// 页面网络活动监听器
///
/// 必须在导航之前创建：事件在监听器内缓冲，导航期间发出的请求也会被计入。
pub struct NetworkWatcher {
    events: BoxStream<'static, NetworkActivity>,
}

impl NetworkWatcher {
    /// 等待在途请求数为 0 且持续 `quiet`；`max_wait` 内未达到时返回 false
    pub async fn wait_for_idle(self, quiet: Duration, max_wait: Duration) -> bool {
        wait_until_quiet(self.events, quiet, max_wait).await
    }
}

/// 统计在途请求，直到连续 `quiet` 时间没有在途请求
///
/// 事件流结束后若仍有在途请求，只能等到 `max_wait` 超时。
pub async fn wait_until_quiet<S>(mut events: S, quiet: Duration, max_wait: Duration) -> bool
where
    S: Stream<Item = NetworkActivity> + Unpin,
{
    let deadline = tokio::time::sleep(max_wait);
    tokio::pin!(deadline);
    let mut inflight: HashSet<String> = HashSet::new();
    let mut ended = false;

    loop {
        let quiet_timer = tokio::time::sleep(quiet);
        tokio::select! {
            _ = &mut deadline => {
                debug!("网络空闲等待超时，仍有 {} 个请求未完成", inflight.len());
                return false;
            }
            event = events.next(), if !ended => match event {
                Some(NetworkActivity::Started(id)) => {
                    inflight.insert(id);
                }
                Some(NetworkActivity::Settled(id)) => {
                    inflight.remove(&id);
                }
                None => ended = true,
            },
            _ = quiet_timer, if inflight.is_empty() => return true,
        }
    }
}

/// 页面驱动
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 不认识项目 / 路由 / 评分
/// - 不处理业务流程
pub struct PageDriver {
    page: Page,
}

impl PageDriver {
    /// 创建新的页面驱动
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 导航到 URL 并等待主文档加载完成
    pub async fn navigate(&self, url: &str, timeout: Duration) -> AppResult<()> {
        let navigation = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, navigation).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AppError::navigation_failed(url, e)),
            Err(_) => Err(AppError::navigation_failed(
                url,
                format!("超过 {} 秒未完成", timeout.as_secs()),
            )),
        }
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let result = self
            .page
            .evaluate(js_code.into())
            .await
            .map_err(BrowserError::ScriptExecutionFailed)?;
        let json_value = result
            .into_value()
            .map_err(BrowserError::ResultDecodeFailed)?;
        Ok(json_value)
    }

    /// 开始监听请求的发出与结束（成功或失败）
    pub async fn watch_network(&self) -> AppResult<NetworkWatcher> {
        let started = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await?
            .map(|e| NetworkActivity::Started(e.request_id.inner().clone()));
        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await?
            .map(|e| NetworkActivity::Settled(e.request_id.inner().clone()));
        let failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await?
            .map(|e| NetworkActivity::Settled(e.request_id.inner().clone()));

        Ok(NetworkWatcher {
            events: stream::select(started, stream::select(finished, failed)).boxed(),
        })
    }

    /// 注入一段 CSS
    pub async fn inject_style(&self, css: &str) -> AppResult<()> {
        let js_code = format!(
            r#"
            (() => {{
                const style = document.createElement('style');
                style.textContent = {};
                (document.head || document.documentElement).appendChild(style);
                return true;
            }})()
            "#,
            serde_json::to_string(css)?
        );
        self.eval(js_code).await?;
        Ok(())
    }

    /// 截取整页 PNG 并写入 `path`
    pub async fn save_full_page_png(&self, path: &Path) -> AppResult<()> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        let bytes = self
            .page
            .save_screenshot(params, path)
            .await
            .map_err(|source| BrowserError::ScreenshotFailed {
                path: path.display().to_string(),
                source,
            })?;
        debug!("截图已保存: {} ({} 字节)", path.display(), bytes.len());
        Ok(())
    }

    /// 关闭页面
    pub async fn close(self) -> AppResult<()> {
        self.page.close().await?;
        Ok(())
    }
}
