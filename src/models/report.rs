//! 比对结果与批量报告（序列化为 HTTP 响应）

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// 单个路由的比对结果（文件系统路径）
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    /// 0 - 100，保留一位小数
    pub similarity: f64,
    pub reference_image: PathBuf,
    pub submission_image: PathBuf,
    pub diff_image: PathBuf,
}

/// 单个页面在响应中的表示（可访问的 URL）
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub score: f64,
    pub solution_image: String,
    pub student_image: String,
    pub diff_image: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Error,
}

/// 学生项目各阶段耗时
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StageTimings {
    pub unzip: Option<String>,
    pub setup: Option<String>,
    pub screenshot: Option<String>,
    pub comparison: Option<String>,
    pub total: Option<String>,
}

/// 单个学生项目的结果
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub student_name: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<BTreeMap<String, PageReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timings: StageTimings,
}

impl BatchItemResult {
    pub fn success(
        student_name: impl Into<String>,
        overall_score: f64,
        pages: BTreeMap<String, PageReport>,
        timings: StageTimings,
    ) -> Self {
        Self {
            student_name: student_name.into(),
            status: ItemStatus::Success,
            overall_score: Some(overall_score),
            pages: Some(pages),
            error: None,
            timings,
        }
    }

    pub fn failed(
        student_name: impl Into<String>,
        error: impl std::fmt::Display,
        timings: StageTimings,
    ) -> Self {
        Self {
            student_name: student_name.into(),
            status: ItemStatus::Error,
            overall_score: None,
            pages: None,
            error: Some(error.to_string()),
            timings,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Success
    }
}

/// 标准答案流程及整体耗时
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchTimings {
    pub extraction: Option<String>,
    pub root_detection: Option<String>,
    pub server_startup: Option<String>,
    pub screenshot_capture: Option<String>,
    pub overall: Option<String>,
}

/// 一次批量比对的完整响应
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub run_id: String,
    pub results: Vec<BatchItemResult>,
    pub timings: BatchTimings,
}

/// 耗时格式化为 "1.23s"
pub fn format_secs(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

/// 保留一位小数
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
