//! 项目定位服务 - 业务能力层
//!
//! 在解压目录中找到可构建的项目根：先看目录本身，再看一层子目录。

use crate::error::{AppResult, ResolveError};
use crate::models::{ProjectInfo, ProjectKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const MANIFEST_FILE: &str = "package.json";
const ENTRY_FILE: &str = "index.html";

/// 定位项目根目录
///
/// 子目录按名称排序后依次检查，返回第一个命中的目录。无副作用。
pub async fn resolve_project_root(base_dir: &Path) -> AppResult<ProjectInfo> {
    if let Some(kind) = detect_kind(base_dir).await {
        debug!("项目根: {} ({})", base_dir.display(), kind);
        return Ok(ProjectInfo::new(base_dir.to_path_buf(), kind));
    }

    for sub_dir in list_subdirs(base_dir).await? {
        if let Some(kind) = detect_kind(&sub_dir).await {
            debug!("项目根: {} ({})", sub_dir.display(), kind);
            return Ok(ProjectInfo::new(sub_dir, kind));
        }
    }

    Err(ResolveError::NotFound {
        dir: base_dir.display().to_string(),
    }
    .into())
}

/// 清单优先于入口页面
async fn detect_kind(dir: &Path) -> Option<ProjectKind> {
    if is_file(&dir.join(MANIFEST_FILE)).await {
        Some(ProjectKind::Dynamic)
    } else if is_file(&dir.join(ENTRY_FILE)).await {
        Some(ProjectKind::Static)
    } else {
        None
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn list_subdirs(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let unreadable = |source| ResolveError::Unreadable {
        dir: dir.display().to_string(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(unreadable)?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
