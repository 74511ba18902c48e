//! 带超时的轮询原语
//!
//! 以固定间隔反复执行一次检查，直到检查给出结果、主动放弃，或次数用尽。

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// 轮询策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// 单次检查的结论
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// 已就绪，结束轮询
    Ready(T),
    /// 尚未就绪，等待下一次
    Retry,
    /// 不可恢复，立即结束
    Abort(E),
}

/// 轮询失败的两种终态
#[derive(Debug, PartialEq, Eq)]
pub enum PollError<E> {
    Aborted(E),
    TimedOut { attempts: u32 },
}

/// 按策略轮询 `check`
///
/// `check` 收到从 1 开始的尝试序号。首次检查立即执行，之后每次间隔 `policy.interval`。
pub async fn poll_until<T, E, F, Fut>(policy: PollPolicy, mut check: F) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    for attempt in 1..=policy.max_attempts {
        match check(attempt).await {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Abort(err) => return Err(PollError::Aborted(err)),
            Attempt::Retry => {
                if attempt < policy.max_attempts {
                    sleep(policy.interval).await;
                }
            }
        }
    }
    Err(PollError::TimedOut {
        attempts: policy.max_attempts,
    })
}
