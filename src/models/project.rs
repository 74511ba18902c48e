//! 项目描述
//!
//! 每个解压后的压缩包只产生一次 `ProjectInfo`，之后不再修改

use std::fmt::Display;
use std::path::PathBuf;

/// 项目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    /// 带 package.json，需要开发服务器
    Dynamic,
    /// 只有 index.html，静态托管即可
    Static,
}

/// 已定位的项目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    /// 可构建/可托管的根目录
    pub root: PathBuf,
    pub kind: ProjectKind,
}

impl ProjectInfo {
    pub fn new(root: PathBuf, kind: ProjectKind) -> Self {
        Self { root, kind }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("package.json")
    }
}

impl Display for ProjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectKind::Dynamic => write!(f, "dynamic"),
            ProjectKind::Static => write!(f, "static"),
        }
    }
}
