//! 编排层（Orchestration Layer）
//!
//! 本层负责请求级别的调度，是整个系统的"指挥中心"。
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 1 个标准答案 + N 个学生)
//!     ↓
//! workflow::ProjectFlow (处理单个项目)
//!     ↓
//! services (能力层：定位 / 依赖 / 启动 / 截图 / 比对)
//!     ↓
//! infrastructure (基础设施：进程 / 解压 / 浏览器 / 轮询)
//! ```
//!
//! 只做调度和统计，不做具体业务判断。

pub mod batch_processor;

pub use batch_processor::{run_in_batches, BatchOrchestrator, BatchRequest, UploadedArchive};
