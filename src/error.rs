use thiserror::Error;

/// 应用程序错误类型
///
/// 按流水线阶段分组；警告类问题（安装失败、单页截图失败、比对降级）不在此列，
/// 它们只记录日志，不会向上传播。
#[derive(Debug, Error)]
pub enum AppError {
    /// 项目根目录定位失败
    #[error("项目定位错误: {0}")]
    Resolve(#[from] ResolveError),
    /// 服务启动失败
    #[error("服务启动错误: {0}")]
    Launch(#[from] LaunchError),
    /// 压缩包解压失败
    #[error("解压错误: {0}")]
    Archive(#[from] ArchiveError),
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件系统错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    /// 图片编解码错误
    #[error("图片错误: {0}")]
    Image(#[from] image::ImageError),
    /// JSON 解析失败
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
    /// HTTP 客户端错误
    #[error("HTTP 错误: {0}")]
    Http(#[from] reqwest::Error),
    /// 其他错误
    #[error("错误: {0}")]
    Other(String),
}

/// 项目定位错误
#[derive(Debug, Error)]
pub enum ResolveError {
    /// 深度 ≤ 1 内既没有 package.json 也没有 index.html
    #[error("在 {dir} 中未找到项目根目录 (package.json 或 index.html)")]
    NotFound { dir: String },
    /// 目录无法读取
    #[error("无法读取目录 {dir}: {source}")]
    Unreadable {
        dir: String,
        #[source]
        source: std::io::Error,
    },
}

/// 服务启动错误
#[derive(Debug, Error)]
pub enum LaunchError {
    /// 进程在可访问之前就退出了
    #[error("端口 {port} 上的服务进程提前退出，退出码 {}。请查看 dev-server.log", display_code(.code))]
    ExitedEarly { port: u16, code: Option<i32> },
    /// 等待就绪超时
    #[error("等待端口 {port} 上的服务超时 (已尝试 {attempts} 次)")]
    TimedOut { port: u16, attempts: u32 },
    /// 进程无法启动
    #[error("无法启动命令 `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// 启动前的准备工作失败（端口分配、日志文件等）
    #[error("启动准备失败: {0}")]
    Setup(String),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "未知 (被信号终止)".to_string(),
    }
}

/// 压缩包错误
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// 压缩包无法打开或格式错误
    #[error("无法读取压缩包 {path}: {source}")]
    Invalid {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
    /// 解压任务异常终止
    #[error("解压任务异常终止: {0}")]
    TaskFailed(String),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 浏览器配置失败
    #[error("浏览器配置失败: {0}")]
    ConfigurationFailed(String),
    /// 启动浏览器失败
    #[error("启动无头浏览器失败: {0}")]
    LaunchFailed(#[source] chromiumoxide::error::CdpError),
    /// 创建页面失败
    #[error("创建页面失败: {0}")]
    PageCreationFailed(#[source] chromiumoxide::error::CdpError),
    /// 导航失败
    #[error("导航到 {url} 失败: {reason}")]
    NavigationFailed { url: String, reason: String },
    /// 执行脚本失败
    #[error("执行脚本失败: {0}")]
    ScriptExecutionFailed(#[source] chromiumoxide::error::CdpError),
    /// 脚本返回值无法解析
    #[error("脚本返回值无法解析: {0}")]
    ResultDecodeFailed(#[source] serde_json::Error),
    /// 截图失败
    #[error("截图失败 ({path}): {source}")]
    ScreenshotFailed {
        path: String,
        #[source]
        source: chromiumoxide::error::CdpError,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件读取失败
    #[error("无法读取配置文件 {path}: {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 配置文件解析失败
    #[error("配置文件 {path} 解析失败: {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 配置值非法
    #[error("配置项 {field} 非法: {reason}")]
    Invalid { field: String, reason: String },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建导航错误
    pub fn navigation_failed(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        AppError::Browser(BrowserError::NavigationFailed {
            url: url.into(),
            reason: reason.to_string(),
        })
    }
}

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(BrowserError::ScriptExecutionFailed(err))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
