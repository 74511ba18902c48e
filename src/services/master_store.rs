//! 共享依赖仓库 - 业务能力层
//!
//! master 项目持有一份预装好的 node_modules，所有 dynamic 项目通过符号链接复用它。
//! 学生项目声明了 master 缺失或主版本不同的依赖时，把这些依赖安装进 master（而不是学生项目），
//! 因此 master 会逐渐成为所有提交依赖的超集。
//!
//! 安装是独占的：同一时刻最多只有一个安装在进行，其余需要安装的流程排队等待。

use crate::error::AppResult;
use crate::infrastructure::CommandSpec;
use crate::models::{PackageManifest, PendingInstall, ProjectInfo};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 依赖协调结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// master 已满足全部依赖
    UpToDate,
    /// 已安装的 `name@version` 列表
    Installed(Vec<String>),
    /// 安装失败，继续使用 master 现有依赖
    InstallFailed { specs: Vec<String>, reason: String },
}

/// 共享依赖仓库管理器
///
/// 整个进程只有一个实例，通过 `Arc` 注入到每条流水线。
pub struct MasterStore {
    dir: PathBuf,
    npm_bin: String,
    install_lock: Mutex<()>,
}

impl MasterStore {
    pub fn new(dir: impl Into<PathBuf>, npm_bin: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            npm_bin: npm_bin.into(),
            install_lock: Mutex::new(()),
        }
    }

    pub fn node_modules(&self) -> PathBuf {
        self.dir.join("node_modules")
    }

    /// 读取 master 的 package.json；缺失或无法解析时视为空
    pub async fn manifest(&self) -> PackageManifest {
        read_manifest_or_default(&self.dir.join("package.json")).await
    }

    /// 把学生项目需要的依赖同步到 master
    ///
    /// 安装失败不会返回错误：页面往往在依赖不完全一致时也能渲染。
    pub async fn reconcile(&self, project: &ProjectInfo, tag: &str) -> ReconcileOutcome {
        let wanted = read_manifest_or_default(&project.manifest_path())
            .await
            .dependency_set();
        if wanted.is_empty() {
            return ReconcileOutcome::UpToDate;
        }

        // 不需要安装时无须排队
        if wanted
            .pending_against(&self.manifest().await.dependency_set())
            .is_empty()
        {
            debug!("[{}] master 已满足全部 {} 个依赖", tag, wanted.len());
            return ReconcileOutcome::UpToDate;
        }

        if self.install_lock.try_lock().is_err() {
            info!("[{}] ⏳ 另一个依赖安装正在进行，等待中...", tag);
        }
        let _guard = self.install_lock.lock().await;

        // 等待期间别的流程可能已经装好了同样的依赖
        let pending = wanted.pending_against(&self.manifest().await.dependency_set());
        if pending.is_empty() {
            debug!("[{}] 等待期间依赖已被其他流程补齐", tag);
            return ReconcileOutcome::UpToDate;
        }
        for item in &pending {
            debug!("[{}] {} {} -> {:?}", tag, item.name, item.version, item.status);
        }

        let specs: Vec<String> = pending.iter().map(PendingInstall::install_spec).collect();
        info!("[{}] 📦 安装/升级 master 依赖: {}", tag, specs.join(", "));

        let command = CommandSpec::new(&self.npm_bin)
            .arg("install")
            .arg("--save")
            .args(specs.iter().cloned())
            .args([
                "--no-audit",
                "--no-fund",
                "--no-progress",
                "--legacy-peer-deps",
            ])
            .current_dir(&self.dir);

        match command.run_to_completion().await {
            Ok(done) if done.success() => {
                info!("[{}] ✓ master 依赖更新完成", tag);
                ReconcileOutcome::Installed(specs)
            }
            Ok(done) => {
                warn!(
                    "[{}] ⚠️ npm install 退出码 {:?}: {}",
                    tag,
                    done.code,
                    done.stderr.trim()
                );
                ReconcileOutcome::InstallFailed {
                    specs,
                    reason: format!("退出码 {:?}", done.code),
                }
            }
            Err(e) => {
                warn!("[{}] ⚠️ 依赖安装失败: {}", tag, e);
                ReconcileOutcome::InstallFailed {
                    specs,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// 把 master 的 node_modules 链接到项目目录（不复制）
    pub async fn link_into(&self, project_dir: &Path) -> AppResult<()> {
        // 安装进行中时不允许链接，避免看到装了一半的目录
        let _guard = self.install_lock.lock().await;

        let source = tokio::fs::canonicalize(self.node_modules()).await?;
        let target = project_dir.join("node_modules");

        if let Ok(meta) = tokio::fs::symlink_metadata(&target).await {
            if meta.file_type().is_symlink() || meta.is_file() {
                tokio::fs::remove_file(&target).await?;
            } else {
                tokio::fs::remove_dir_all(&target).await?;
            }
        }

        #[cfg(unix)]
        tokio::fs::symlink(&source, &target).await?;
        #[cfg(windows)]
        tokio::fs::symlink_dir(&source, &target).await?;

        debug!("已链接 {} -> {}", target.display(), source.display());
        Ok(())
    }
}

async fn read_manifest_or_default(path: &Path) -> PackageManifest {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!("无法读取 {}: {}", path.display(), e);
            return PackageManifest::default();
        }
    };
    PackageManifest::from_json(&content).unwrap_or_else(|e| {
        warn!("无法解析 {}: {}", path.display(), e);
        PackageManifest::default()
    })
}
