//! 项目处理流程 - 流程层
//!
//! 核心职责：定义"一个项目"的完整处理流程
//!
//! 流程顺序：
//! 1. 解压 → 定位项目根 → 同步 master 依赖
//! 2. 分配端口 → 启动服务并等待就绪
//! 3. 截图
//! 4. （学生）逐路由与标准答案比对 → 汇总得分
//!
//! 学生流程中启动的服务在流程结束时总会被关闭，无论成功与否。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::archive;
use crate::models::report::{format_secs, round1};
use crate::models::{
    BatchItemResult, BatchTimings, PageReport, ProjectInfo, ProjectKind, StageTimings,
};
use crate::services::{
    allocate_port, resolve_project_root, route_display_name, route_file_name, CaptureSettings,
    ImageComparator, LaunchSettings, MasterStore, ReconcileOutcome, RouteCapture,
    RunningServer, ScreenshotCapturer, ServerLauncher,
};
use crate::workflow::run_ctx::{Role, RunContext, SubmissionCtx};

/// 标准答案流程的产物
pub struct SolutionRun {
    /// 保持运行直到整个请求结束
    pub server: RunningServer,
    pub screenshots: Vec<RouteCapture>,
    pub timings: BatchTimings,
}

/// 项目处理流程
///
/// - 编排单个项目的完整处理流程
/// - 不持有任何进程，只依赖业务能力（services）
pub struct ProjectFlow {
    master: Arc<MasterStore>,
    launcher: ServerLauncher,
    capturer: ScreenshotCapturer,
    comparator: ImageComparator,
    routes: Vec<String>,
}

impl ProjectFlow {
    pub fn new(
        master: Arc<MasterStore>,
        launcher: ServerLauncher,
        capturer: ScreenshotCapturer,
        comparator: ImageComparator,
        routes: Vec<String>,
    ) -> Self {
        Self {
            master,
            launcher,
            capturer,
            comparator,
            routes,
        }
    }

    pub fn from_config(config: &Config, master: Arc<MasterStore>) -> AppResult<Self> {
        let launcher = ServerLauncher::new(LaunchSettings::from_config(config), master.clone())?;
        Ok(Self::new(
            master,
            launcher,
            ScreenshotCapturer::new(CaptureSettings::from_config(config)),
            ImageComparator::from_config(config),
            config.routes.clone(),
        ))
    }

    /// 处理标准答案：失败直接返回错误（没有可比对的基准）
    pub async fn run_solution(&self, run: &RunContext, ctx: &SubmissionCtx) -> AppResult<SolutionRun> {
        let mut timings = BatchTimings::default();

        info!("{} 📦 解压标准答案...", ctx);
        let started = Instant::now();
        let raw_dir = run.solution_raw_dir();
        archive::extract(&ctx.archive, &raw_dir).await?;
        timings.extraction = Some(format_secs(started.elapsed()));

        let started = Instant::now();
        let project = resolve_project_root(&raw_dir).await?;
        info!("{} ✓ 项目根: {} ({})", ctx, project.root.display(), project.kind);
        timings.root_detection = Some(format_secs(started.elapsed()));

        let started = Instant::now();
        let mut server = self.start_server(&project, ctx).await?;
        timings.server_startup = Some(format_secs(started.elapsed()));

        let started = Instant::now();
        let screenshots = match self
            .capturer
            .capture(
                &server.base_url,
                &self.routes,
                &run.solution_screenshots_dir(),
                &ctx.to_string(),
            )
            .await
        {
            Ok(shots) if shots.iter().any(|s| s.captured) => shots,
            Ok(_) => {
                server.shutdown().await;
                return Err(AppError::Other("标准答案所有路由截图均失败".to_string()));
            }
            Err(e) => {
                server.shutdown().await;
                return Err(e);
            }
        };
        timings.screenshot_capture = Some(format_secs(started.elapsed()));
        info!("{} ✓ 标准答案截图完成", ctx);

        Ok(SolutionRun {
            server,
            screenshots,
            timings,
        })
    }

    /// 处理单个学生：任何错误都转换为该学生的错误结果
    pub async fn run_student(
        &self,
        run: &RunContext,
        ctx: &SubmissionCtx,
        reference: &[RouteCapture],
    ) -> BatchItemResult {
        let started = Instant::now();
        let mut timings = StageTimings::default();
        let mut server = None;

        let outcome = self
            .student_pipeline(run, ctx, reference, &mut timings, &mut server)
            .await;

        if let Some(mut server) = server {
            server.shutdown().await;
        }
        timings.total = Some(format_secs(started.elapsed()));

        match outcome {
            Ok((score, pages)) => {
                info!("{} ✅ {} 完成，总分 {:.1}", ctx, ctx.label, score);
                BatchItemResult::success(ctx.label.clone(), score, pages, timings)
            }
            Err(e) => {
                error!("{} ❌ {} 处理失败: {}", ctx, ctx.label, e);
                BatchItemResult::failed(ctx.label.clone(), e, timings)
            }
        }
    }

    async fn student_pipeline(
        &self,
        run: &RunContext,
        ctx: &SubmissionCtx,
        reference: &[RouteCapture],
        timings: &mut StageTimings,
        server: &mut Option<RunningServer>,
    ) -> AppResult<(f64, BTreeMap<String, PageReport>)> {
        let index = match ctx.role {
            Role::Student(index) => index,
            Role::Solution => {
                return Err(AppError::Other("标准答案不能按学生流程处理".to_string()))
            }
        };
        let tag = ctx.to_string();

        let started = Instant::now();
        let raw_dir = run.student_raw_dir(index);
        archive::extract(&ctx.archive, &raw_dir).await?;
        timings.unzip = Some(format_secs(started.elapsed()));

        let started = Instant::now();
        let project = resolve_project_root(&raw_dir).await?;
        info!("{} ✓ 项目根: {} ({})", ctx, project.root.display(), project.kind);
        let running = self.start_server(&project, ctx).await?;
        let base_url = running.base_url.clone();
        *server = Some(running);
        timings.setup = Some(format_secs(started.elapsed()));

        let started = Instant::now();
        let shots_dir = run.student_screenshots_dir(index);
        let captures = self
            .capturer
            .capture(&base_url, &self.routes, &shots_dir, &tag)
            .await?;
        if captures.iter().all(|c| !c.captured) {
            warn!("{} ⚠️ 所有路由截图均失败，得分将为 0", ctx);
        }
        timings.screenshot = Some(format_secs(started.elapsed()));

        let started = Instant::now();
        let diffs_dir = run.student_diffs_dir(index);
        tokio::fs::create_dir_all(&diffs_dir).await?;

        let mut pages = BTreeMap::new();
        let mut scores = Vec::with_capacity(reference.len());
        for solution_shot in reference {
            let file_name = route_file_name(&solution_shot.route);
            let result = self
                .comparator
                .compare_files(
                    solution_shot.path.clone(),
                    shots_dir.join(&file_name),
                    diffs_dir.join(&file_name),
                )
                .await;
            info!(
                "{} 📊 {} 相似度 {:.1}%",
                ctx, solution_shot.route, result.similarity
            );

            scores.push(result.similarity);
            pages.insert(
                route_display_name(&solution_shot.route),
                PageReport {
                    score: result.similarity,
                    solution_image: run.url_for(&result.reference_image),
                    student_image: run.url_for(&result.submission_image),
                    diff_image: run.url_for(&result.diff_image),
                },
            );
        }
        timings.comparison = Some(format_secs(started.elapsed()));

        Ok((overall_score(&scores), pages))
    }

    /// 同步依赖（dynamic）→ 分配端口 → 启动
    async fn start_server(&self, project: &ProjectInfo, ctx: &SubmissionCtx) -> AppResult<RunningServer> {
        if project.kind == ProjectKind::Dynamic {
            match self.master.reconcile(project, &ctx.to_string()).await {
                ReconcileOutcome::UpToDate => {}
                ReconcileOutcome::Installed(specs) => {
                    info!("{} ✓ master 新增依赖 {} 个", ctx, specs.len())
                }
                ReconcileOutcome::InstallFailed { reason, .. } => {
                    warn!("{} ⚠️ 依赖安装失败，继续使用现有依赖: {}", ctx, reason)
                }
            }
        }

        let port = allocate_port()?;
        info!("{} 🚀 在端口 {} 启动 {} 服务...", ctx, port, project.kind);
        let server = self.launcher.launch(project, port).await?;
        info!("{} ✓ 服务就绪: {}", ctx, server.base_url);
        Ok(server)
    }
}

/// 各路由得分的平均值，限制在 [0, 100]；没有路由时为 0
pub fn overall_score(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    round1(mean.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn flow_with(config: &Config, dir: &Path) -> ProjectFlow {
        let master = Arc::new(MasterStore::new(dir.join("master"), "npm"));
        ProjectFlow::from_config(config, master).unwrap()
    }

    #[test]
    fn test_overall_score_is_mean_of_routes() {
        assert_eq!(overall_score(&[100.0, 50.0]), 75.0);
        assert_eq!(overall_score(&[33.3, 33.3, 33.4]), 33.3);
        assert_eq!(overall_score(&[]), 0.0);
    }

    #[tokio::test]
    async fn test_student_with_broken_archive_is_error_result() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let flow = flow_with(&config, dir.path());
        let run = RunContext::create(dir.path(), &config.public_base_url)
            .await
            .unwrap();

        let archive = dir.path().join("alice.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();
        let ctx = SubmissionCtx::student(1, "alice".to_string(), archive);

        let result = flow.run_student(&run, &ctx, &[]).await;
        assert!(!result.is_success());
        assert_eq!(result.student_name, "alice");
        assert!(result.error.is_some());
        assert!(result.timings.total.is_some());
        assert!(result.timings.setup.is_none());
    }

    #[tokio::test]
    async fn test_student_without_project_root_is_error_result() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let flow = flow_with(&config, dir.path());
        let run = RunContext::create(dir.path(), &config.public_base_url)
            .await
            .unwrap();

        // 只有一个 README 的压缩包
        let archive = dir.path().join("bob.zip");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file("README.md", zip::write::SimpleFileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut zip, b"# nothing here").unwrap();
            zip.finish().unwrap();
        }
        let ctx = SubmissionCtx::student(2, "bob".to_string(), archive);

        let result = flow.run_student(&run, &ctx, &[]).await;
        assert!(!result.is_success());
        assert!(result.timings.unzip.is_some());
        assert!(result.error.unwrap().contains("项目定位错误"));
    }

    #[tokio::test]
    async fn test_solution_failure_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let flow = flow_with(&config, dir.path());
        let run = RunContext::create(dir.path(), &config.public_base_url)
            .await
            .unwrap();

        let ctx = SubmissionCtx::solution(PathBuf::from("/no/such/solution.zip"));
        assert!(flow.run_solution(&run, &ctx).await.is_err());
    }
    #[cfg(unix)]
    #[tokio::test]
    async fn test_student_server_exit_becomes_error_with_exit_code() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let npx = dir.path().join("fake-npx");
        std::fs::write(&npx, "#!/bin/sh\nexit 3\n").unwrap();
        std::fs::set_permissions(&npx, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = Config {
            npx_bin: npx.display().to_string(),
            poll_interval_ms: 20,
            max_poll_attempts: 250,
            ..Config::default()
        };
        let flow = flow_with(&config, dir.path());
        let run = RunContext::create(dir.path(), &config.public_base_url)
            .await
            .unwrap();

        let archive = dir.path().join("carol.zip");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file("site/index.html", zip::write::SimpleFileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut zip, b"<h1>Hello</h1>").unwrap();
            zip.finish().unwrap();
        }
        let ctx = SubmissionCtx::student(3, "carol".to_string(), archive);

        let result = flow.run_student(&run, &ctx, &[]).await;
        assert!(!result.is_success());
        assert_eq!(result.student_name, "carol");
        let message = result.error.unwrap();
        assert!(message.contains("服务启动错误"));
        assert!(message.contains("退出码 3"));
        assert!(result.timings.setup.is_none());
        assert!(result.timings.total.is_some());
    }
}
