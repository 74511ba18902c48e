//! 批量比对处理器 - 编排层
//!
//! ## 职责
//!
//! 1. **标准答案优先**：先完整处理标准答案，得到基准截图
//! 2. **分批处理**：学生按固定大小分批，批内并发、批间串行
//! 3. **错误隔离**：单个学生失败只影响自己的结果条目
//! 4. **资源清理**：请求结束时关闭标准答案服务并删除上传文件

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::models::report::format_secs;
use crate::models::{BatchItemResult, BatchReport, StageTimings};
use crate::services::RouteCapture;
use crate::utils::logging::{log_batch_complete, log_batch_start, print_final_stats};
use crate::workflow::{ProjectFlow, RunContext, SubmissionCtx};

/// 一个上传的压缩包
#[derive(Debug, Clone)]
pub struct UploadedArchive {
    pub path: PathBuf,
    /// 学生名（标准答案忽略）
    pub label: String,
}

/// 一次比对请求
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub solution: UploadedArchive,
    pub students: Vec<UploadedArchive>,
}

impl BatchRequest {
    fn uploads(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.solution.path).chain(self.students.iter().map(|s| &s.path))
    }
}

/// 批量比对编排器
pub struct BatchOrchestrator {
    flow: Arc<ProjectFlow>,
    temp_dir: PathBuf,
    public_base_url: String,
    batch_size: usize,
}

impl BatchOrchestrator {
    pub fn new(
        flow: Arc<ProjectFlow>,
        temp_dir: PathBuf,
        public_base_url: String,
        batch_size: usize,
    ) -> Self {
        Self {
            flow,
            temp_dir,
            public_base_url,
            batch_size: batch_size.max(1),
        }
    }

    /// 处理一次请求；上传文件在任何情况下都会被删除
    pub async fn run(&self, request: BatchRequest) -> AppResult<BatchReport> {
        let result = self.run_request(&request).await;

        for upload in request.uploads() {
            if let Err(e) = tokio::fs::remove_file(upload).await {
                warn!("删除上传文件 {} 失败: {}", upload.display(), e);
            }
        }

        result
    }

    async fn run_request(&self, request: &BatchRequest) -> AppResult<BatchReport> {
        let started = Instant::now();
        let run = Arc::new(RunContext::create(&self.temp_dir, &self.public_base_url).await?);
        info!(
            "🆕 运行 {}: 1 个标准答案，{} 个学生项目",
            run.run_id,
            request.students.len()
        );

        let solution_ctx = SubmissionCtx::solution(request.solution.path.clone());
        let mut solution = self.flow.run_solution(&run, &solution_ctx).await?;
        let reference: Arc<Vec<RouteCapture>> = Arc::new(solution.screenshots.clone());

        let students: Vec<SubmissionCtx> = request
            .students
            .iter()
            .enumerate()
            .map(|(i, upload)| SubmissionCtx::student(i + 1, upload.label.clone(), upload.path.clone()))
            .collect();
        let labels: Vec<String> = students.iter().map(|s| s.label.clone()).collect();

        let flow = self.flow.clone();
        let task_run = run.clone();
        let outcomes = run_in_batches(students, self.batch_size, move |ctx| {
            let flow = flow.clone();
            let run = task_run.clone();
            let reference = reference.clone();
            async move { flow.run_student(&run, &ctx, &reference).await }
        })
        .await;

        let results: Vec<BatchItemResult> = outcomes
            .into_iter()
            .zip(labels)
            .map(|(outcome, label)| {
                outcome.unwrap_or_else(|e| {
                    error!("[{}] 任务执行失败: {}", label, e);
                    BatchItemResult::failed(label, e, StageTimings::default())
                })
            })
            .collect();

        solution.server.shutdown().await;

        let mut timings = solution.timings;
        timings.overall = Some(format_secs(started.elapsed()));

        let success = results.iter().filter(|r| r.is_success()).count();
        print_final_stats(
            &run.run_id,
            success,
            results.len() - success,
            timings.overall.as_deref().unwrap_or_default(),
        );

        Ok(BatchReport {
            run_id: run.run_id.clone(),
            results,
            timings,
        })
    }
}

/// 分批并发执行：每批最多 `batch_size` 个任务同时运行，整批完成后再开始下一批
///
/// 结果顺序与输入顺序一致；任务 panic 时对应位置为 `Err(JoinError)`。
pub async fn run_in_batches<T, R, F, Fut>(
    items: Vec<T>,
    batch_size: usize,
    task: F,
) -> Vec<Result<R, JoinError>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let batch_size = batch_size.max(1);
    let total = items.len();
    let total_batches = total.div_ceil(batch_size);
    let mut results = Vec::with_capacity(total);
    let mut items = items.into_iter();

    for batch_start in (0..total).step_by(batch_size) {
        let batch_end = (batch_start + batch_size).min(total);
        let batch_num = batch_start / batch_size + 1;
        log_batch_start(batch_num, total_batches, batch_start + 1, batch_end, total);

        let handles: Vec<_> = items
            .by_ref()
            .take(batch_end - batch_start)
            .map(|item| tokio::spawn(task(item)))
            .collect();

        let mut success = 0;
        for handle in handles {
            let outcome = handle.await;
            if outcome.is_ok() {
                success += 1;
            }
            results.push(outcome);
        }

        log_batch_complete(batch_num, success, batch_end - batch_start);
    }

    results
}
