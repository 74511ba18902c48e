use crate::error::{AppResult, ConfigError};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 默认配置文件名（存在时自动加载）
const DEFAULT_CONFIG_FILE: &str = "grader.toml";

/// 程序配置文件
///
/// 加载顺序：内置默认值 ← TOML 配置文件 ← 环境变量
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- HTTP 服务 ---
    /// 评分服务监听地址
    pub listen_addr: SocketAddr,
    /// 对外暴露的地址（拼接截图 URL 用）
    pub public_base_url: String,

    // --- 目录 ---
    /// 上传文件临时存放目录
    pub uploads_dir: PathBuf,
    /// 每次运行的工作目录根
    pub temp_dir: PathBuf,
    /// 共享依赖模板项目（master store）
    pub master_dir: PathBuf,
    /// 输出日志文件
    pub log_file: PathBuf,

    // --- 批处理 ---
    /// 每批同时处理的学生项目数量
    pub batch_size: usize,
    /// 需要截图比对的路由
    pub routes: Vec<String>,

    // --- 服务启动 ---
    /// 开发服务器绑定的主机
    pub bind_host: String,
    /// 就绪探测间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 最大探测次数
    pub max_poll_attempts: u32,
    /// mock 后端端口
    pub mock_api_port: u16,
    /// mock 后端启动宽限期（毫秒）
    pub mock_api_grace_ms: u64,
    pub npm_bin: String,
    pub npx_bin: String,
    pub node_bin: String,

    // --- 截图 ---
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// 注入样式后的稳定等待（毫秒）
    pub settle_delay_ms: u64,
    /// 网络空闲判定窗口（毫秒）
    pub network_idle_ms: u64,
    /// 单次导航超时（秒）
    pub navigation_timeout_secs: u64,
    /// 自定义浏览器可执行文件路径
    pub chrome_executable: Option<PathBuf>,

    // --- 图片比对 ---
    /// 像素差异阈值 (0.0 - 1.0)，越小越严格
    pub diff_threshold: f64,
    /// 是否把抗锯齿像素也计为差异
    pub include_anti_aliasing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            public_base_url: "http://127.0.0.1:3000".to_string(),
            uploads_dir: PathBuf::from("uploads"),
            temp_dir: PathBuf::from("temp"),
            master_dir: PathBuf::from("master_project"),
            log_file: PathBuf::from("server.log"),
            batch_size: 2,
            routes: vec!["/".to_string()],
            bind_host: "127.0.0.1".to_string(),
            poll_interval_ms: 1000,
            max_poll_attempts: 180,
            mock_api_port: 8000,
            mock_api_grace_ms: 2000,
            npm_bin: "npm".to_string(),
            npx_bin: "npx".to_string(),
            node_bin: "node".to_string(),
            viewport_width: 1280,
            viewport_height: 800,
            settle_delay_ms: 1000,
            network_idle_ms: 500,
            navigation_timeout_secs: 30,
            chrome_executable: None,
            diff_threshold: 0.1,
            include_anti_aliasing: true,
        }
    }
}

impl Config {
    /// 读取配置文件（`GRADER_CONFIG` 或当前目录下的 grader.toml），再叠加环境变量
    pub fn from_env() -> AppResult<Self> {
        let base = match std::env::var("GRADER_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_toml_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            Err(_) => Self::default(),
        };
        let config = base.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    fn from_toml_str(content: &str, path: &Path) -> AppResult<Self> {
        let config = toml::from_str(content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    /// 用环境变量覆盖配置项；`lookup` 便于测试时注入
    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        if let Some(v) = parse_var(&lookup, "GRADER_LISTEN_ADDR", "SocketAddr")? {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("GRADER_PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }
        if let Some(v) = lookup("GRADER_UPLOADS_DIR") {
            self.uploads_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("GRADER_TEMP_DIR") {
            self.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("GRADER_MASTER_DIR") {
            self.master_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("GRADER_LOG_FILE") {
            self.log_file = PathBuf::from(v);
        }
        if let Some(v) = parse_var(&lookup, "GRADER_BATCH_SIZE", "usize")? {
            self.batch_size = v;
        }
        if let Some(v) = lookup("GRADER_ROUTES") {
            self.routes = v
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
        }
        if let Some(v) = lookup("GRADER_BIND_HOST") {
            self.bind_host = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_POLL_INTERVAL_MS", "u64")? {
            self.poll_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_MAX_POLL_ATTEMPTS", "u32")? {
            self.max_poll_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_MOCK_API_PORT", "u16")? {
            self.mock_api_port = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_MOCK_API_GRACE_MS", "u64")? {
            self.mock_api_grace_ms = v;
        }
        if let Some(v) = lookup("GRADER_NPM_BIN") {
            self.npm_bin = v;
        }
        if let Some(v) = lookup("GRADER_NPX_BIN") {
            self.npx_bin = v;
        }
        if let Some(v) = lookup("GRADER_NODE_BIN") {
            self.node_bin = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_VIEWPORT_WIDTH", "u32")? {
            self.viewport_width = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_VIEWPORT_HEIGHT", "u32")? {
            self.viewport_height = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_SETTLE_DELAY_MS", "u64")? {
            self.settle_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_NETWORK_IDLE_MS", "u64")? {
            self.network_idle_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_NAVIGATION_TIMEOUT_SECS", "u64")? {
            self.navigation_timeout_secs = v;
        }
        if let Some(v) = lookup("CHROME_EXECUTABLE") {
            self.chrome_executable = Some(PathBuf::from(v));
        }
        if let Some(v) = parse_var(&lookup, "GRADER_DIFF_THRESHOLD", "f64")? {
            self.diff_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "GRADER_INCLUDE_AA", "bool")? {
            self.include_anti_aliasing = v;
        }
        Ok(self)
    }

    fn validate(&self) -> AppResult<()> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "必须大于 0"));
        }
        if self.routes.is_empty() {
            return Err(invalid("routes", "至少需要一个路由"));
        }
        if !(0.0..=1.0).contains(&self.diff_threshold) {
            return Err(invalid("diff_threshold", "必须在 0.0 到 1.0 之间"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn mock_api_grace(&self) -> Duration {
        Duration::from_millis(self.mock_api_grace_ms)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var_name: &str,
    expected_type: &str,
) -> AppResult<Option<T>> {
    match lookup(var_name) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| {
            ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: expected_type.to_string(),
            }
            .into()
        }),
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::AppError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
