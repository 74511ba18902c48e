//! # Visual Grader
//!
//! 前端作业视觉回归评分服务：上传标准答案和学生项目的压缩包，
//! 自动启动每个项目、截图，并与标准答案逐像素比对打分。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（子进程、浏览器、Page），只暴露能力
//! - `ProcessHandle` - 子进程所有者，提供跨平台的进程树终止
//! - `PageDriver` - 唯一的 page owner，提供导航/注入样式/截图能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个项目
//! - `resolve_project_root` - 定位项目根
//! - `MasterStore` - 共享依赖仓库（安装互斥）
//! - `ServerLauncher` - 启动静态/开发服务器并等待就绪
//! - `ScreenshotCapturer` - 截图
//! - `ImageComparator` - 图片比对
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个项目"的完整处理流程
//! - `RunContext` / `SubmissionCtx` - 上下文封装（runId + 学生编号）
//! - `ProjectFlow` - 流程编排（解压 → 定位 → 启动 → 截图 → 比对）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 先标准答案、再分批并发处理学生
//!
//! `api` 与 `app` 负责 HTTP 接口和应用装配。

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{BatchItemResult, BatchReport, ProjectInfo, ProjectKind};
pub use orchestrator::{BatchOrchestrator, BatchRequest, UploadedArchive};
pub use services::{resolve_project_root, ImageComparator, MasterStore};
pub use workflow::{ProjectFlow, RunContext, SubmissionCtx};
