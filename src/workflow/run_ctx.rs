//! 运行上下文
//!
//! 每个比对请求独占一个运行目录 `temp/<runId>`，所有解压、截图、差异图都落在其中，
//! 不同请求之间、同一请求内的不同学生之间互不重叠。

use std::fmt::Display;
use std::path::{Component, Path, PathBuf};

use crate::error::AppResult;
use uuid::Uuid;

/// 单次请求的运行上下文
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub run_dir: PathBuf,
    /// 拼接截图 URL 的前缀，例如 `http://127.0.0.1:3000`
    public_base_url: String,
}

impl RunContext {
    /// 生成新的 runId 并创建运行目录
    pub async fn create(temp_root: &Path, public_base_url: &str) -> AppResult<Self> {
        let ctx = Self::with_id(temp_root, generate_run_id(), public_base_url);
        tokio::fs::create_dir_all(&ctx.run_dir).await?;
        Ok(ctx)
    }

    pub fn with_id(temp_root: &Path, run_id: String, public_base_url: &str) -> Self {
        Self {
            run_dir: temp_root.join(&run_id),
            run_id,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn solution_raw_dir(&self) -> PathBuf {
        self.run_dir.join("solution_raw")
    }

    pub fn solution_screenshots_dir(&self) -> PathBuf {
        self.run_dir.join("solution").join("screenshots")
    }

    pub fn student_dir(&self, index: usize) -> PathBuf {
        self.run_dir.join("students").join(index.to_string())
    }

    pub fn student_raw_dir(&self, index: usize) -> PathBuf {
        self.student_dir(index).join("raw")
    }

    pub fn student_screenshots_dir(&self, index: usize) -> PathBuf {
        self.student_dir(index).join("screenshots")
    }

    pub fn student_diffs_dir(&self, index: usize) -> PathBuf {
        self.student_dir(index).join("diffs")
    }

    /// 运行目录内文件对应的访问地址：`<base>/temp/<runId>/<相对路径>`
    ///
    /// 不在运行目录内的路径原样输出。
    pub fn url_for(&self, path: &Path) -> String {
        match path.strip_prefix(&self.run_dir) {
            Ok(relative) => {
                let segments: Vec<String> = relative
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect();
                format!(
                    "{}/temp/{}/{}",
                    self.public_base_url,
                    self.run_id,
                    segments.join("/")
                )
            }
            Err(_) => path.display().to_string(),
        }
    }
}

/// 时间戳（毫秒精度）+ 短随机后缀
pub fn generate_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}",
        chrono::Local::now().format("%Y%m%d%H%M%S%3f"),
        &suffix[..8]
    )
}

/// 提交物角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Solution,
    /// 学生编号（从 1 开始）
    Student(usize),
}

/// 单个提交物的处理上下文
#[derive(Debug, Clone)]
pub struct SubmissionCtx {
    pub role: Role,
    /// 报告中显示的名称
    pub label: String,
    /// 上传的压缩包
    pub archive: PathBuf,
}

impl SubmissionCtx {
    pub fn solution(archive: PathBuf) -> Self {
        Self {
            role: Role::Solution,
            label: "Solution".to_string(),
            archive,
        }
    }

    pub fn student(index: usize, label: String, archive: PathBuf) -> Self {
        Self {
            role: Role::Student(index),
            label,
            archive,
        }
    }
}

impl Display for SubmissionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.role {
            Role::Solution => write!(f, "[solution]"),
            Role::Student(index) => write!(f, "[student {}]", index),
        }
    }
}

/// 上传文件名去掉 `.zip` 作为学生名；没有文件名时用 `Student N`
pub fn label_from_file_name(file_name: Option<&str>, index: usize) -> String {
    let stem = file_name
        .map(|name| {
            let name = name.trim();
            name.strip_suffix(".zip")
                .or_else(|| name.strip_suffix(".ZIP"))
                .unwrap_or(name)
        })
        .filter(|stem| !stem.is_empty());

    match stem {
        Some(stem) => stem.to_string(),
        None => format!("Student {}", index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_ne!(a, b);
        // 17 位时间戳 + '-' + 8 位后缀
        assert_eq!(a.len(), 26);
    }

    #[test]
    fn test_layout_is_confined_to_run_dir() {
        let ctx = RunContext::with_id(Path::new("temp"), "r1".to_string(), "http://h:3000/");
        assert_eq!(ctx.solution_raw_dir(), Path::new("temp/r1/solution_raw"));
        assert_eq!(
            ctx.solution_screenshots_dir(),
            Path::new("temp/r1/solution/screenshots")
        );
        assert_eq!(ctx.student_raw_dir(2), Path::new("temp/r1/students/2/raw"));
        assert_eq!(ctx.student_diffs_dir(2), Path::new("temp/r1/students/2/diffs"));
    }

    #[test]
    fn test_url_for_artifacts() {
        let ctx = RunContext::with_id(Path::new("temp"), "r1".to_string(), "http://h:3000/");
        let shot = ctx.student_screenshots_dir(3).join("index.png");
        assert_eq!(
            ctx.url_for(&shot),
            "http://h:3000/temp/r1/students/3/screenshots/index.png"
        );
        assert_eq!(ctx.url_for(Path::new("/elsewhere/a.png")), "/elsewhere/a.png");
    }

    #[test]
    fn test_labels() {
        assert_eq!(label_from_file_name(Some("alice.zip"), 1), "alice");
        assert_eq!(label_from_file_name(Some("bob"), 2), "bob");
        assert_eq!(label_from_file_name(Some(".zip"), 3), "Student 3");
        assert_eq!(label_from_file_name(None, 4), "Student 4");
    }

    #[test]
    fn test_ctx_display() {
        let ctx = SubmissionCtx::student(3, "alice".into(), PathBuf::from("a.zip"));
        assert_eq!(ctx.to_string(), "[student 3]");
        assert_eq!(
            SubmissionCtx::solution(PathBuf::from("s.zip")).to_string(),
            "[solution]"
        );
    }
}
