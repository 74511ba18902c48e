//! 基础设施层（Infrastructure Layer）
//!
//! 持有稀缺资源（子进程、浏览器、页面），只暴露能力，不认识学生 / 评分 / 批次。

pub mod archive;
pub mod browser;
pub mod page_driver;
pub mod poll;
pub mod process;

pub use browser::{BrowserOptions, HeadlessBrowser};
pub use page_driver::{NetworkWatcher, PageDriver};
pub use poll::{poll_until, Attempt, PollError, PollPolicy};
pub use process::{CommandSpec, CompletedCommand, OutputSink, ProcessHandle};
