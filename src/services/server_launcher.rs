//! 服务启动器 - 业务能力层
//!
//! 为已定位的项目启动静态服务器或框架开发服务器（可选附带 mock 后端），
//! 并一直阻塞到服务可以访问为止。
//!
//! ```text
//! Spawning → Polling → Ready | Failed(退出码) | TimedOut
//! ```

use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppResult, LaunchError};
use crate::infrastructure::{
    poll_until, Attempt, CommandSpec, OutputSink, PollError, PollPolicy, ProcessHandle,
};
use crate::models::{PackageManifest, ProjectInfo, ProjectKind};
use crate::services::master_store::MasterStore;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// 启动参数（从 Config 提取）
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub bind_host: String,
    pub poll: PollPolicy,
    pub mock_api_port: u16,
    pub mock_api_grace: Duration,
    pub npm_bin: String,
    pub npx_bin: String,
    pub node_bin: String,
}

impl LaunchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_host: config.bind_host.clone(),
            poll: PollPolicy::new(config.poll_interval(), config.max_poll_attempts),
            mock_api_port: config.mock_api_port,
            mock_api_grace: config.mock_api_grace(),
            npm_bin: config.npm_bin.clone(),
            npx_bin: config.npx_bin.clone(),
            node_bin: config.node_bin.clone(),
        }
    }
}

/// 已就绪的服务
///
/// 由启动它的流水线持有，每次运行必须且只能 `shutdown()` 一次。
#[derive(Debug)]
pub struct RunningServer {
    pub base_url: String,
    pub port: u16,
    process: ProcessHandle,
    companion: Option<ProcessHandle>,
}

impl RunningServer {
    /// 终止服务进程及 mock 后端；重复调用是空操作
    pub async fn shutdown(&mut self) {
        self.process.terminate().await;
        if let Some(companion) = self.companion.as_mut() {
            companion.terminate().await;
        }
    }
}

/// 启动脚本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartScript {
    Dev,
    Start,
}

impl StartScript {
    /// 优先 dev，没有 dev 但有 start 时用 start
    pub fn select(manifest: &PackageManifest) -> Self {
        if !manifest.has_script("dev") && manifest.has_script("start") {
            StartScript::Start
        } else {
            StartScript::Dev
        }
    }

    fn name(self) -> &'static str {
        match self {
            StartScript::Dev => "dev",
            StartScript::Start => "start",
        }
    }
}

/// 服务启动器
pub struct ServerLauncher {
    settings: LaunchSettings,
    master: Arc<MasterStore>,
    http: reqwest::Client,
}

impl ServerLauncher {
    pub fn new(settings: LaunchSettings, master: Arc<MasterStore>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self {
            settings,
            master,
            http,
        })
    }

    /// 启动项目并等待就绪
    pub async fn launch(&self, project: &ProjectInfo, port: u16) -> AppResult<RunningServer> {
        let tag = format!(":{}", port);
        match project.kind {
            ProjectKind::Static => self.launch_static(project, port, &tag).await,
            ProjectKind::Dynamic => self.launch_dynamic(project, port, &tag).await,
        }
    }

    async fn launch_static(
        &self,
        project: &ProjectInfo,
        port: u16,
        tag: &str,
    ) -> AppResult<RunningServer> {
        info!("[{}] 启动静态服务器: {}", tag, project.root.display());
        let process = CommandSpec::new(&self.settings.npx_bin)
            .args(["-y", "serve", ".", "-p"])
            .arg(port.to_string())
            .current_dir(&project.root)
            .spawn(
                format!("static{}", tag),
                OutputSink::LogFile(project.root.join("static-server.log")),
            )?;
        self.await_ready(process, None, port, "", tag).await
    }

    async fn launch_dynamic(
        &self,
        project: &ProjectInfo,
        port: u16,
        tag: &str,
    ) -> AppResult<RunningServer> {
        let manifest = read_manifest(&project.root).await;

        info!("[{}] 使用共享 node_modules...", tag);
        if let Err(e) = self.master.link_into(&project.root).await {
            warn!("[{}] ⚠️ 链接共享依赖失败: {}，改为本地安装", tag, e);
            self.local_install(&project.root, tag).await;
        }

        let companion = self.start_mock_api(&project.root, tag).await?;

        let script = StartScript::select(&manifest);
        let base_path = base_path_from_homepage(manifest.homepage.as_deref());
        info!(
            "[{}] 启动开发服务器: npm run {} (base path: '{}')",
            tag,
            script.name(),
            base_path
        );

        let mut command = CommandSpec::new(&self.settings.npm_bin)
            .args(["run", script.name()])
            .current_dir(&project.root);
        if script == StartScript::Dev {
            command = command
                .args(["--", "--port"])
                .arg(port.to_string())
                .arg("--host");
        }
        for (key, value) in dev_server_env(port, &self.settings.bind_host) {
            command = command.env(key, value);
        }

        let process = match command.spawn(
            format!("dev{}", tag),
            OutputSink::LogFile(project.root.join("dev-server.log")),
        ) {
            Ok(process) => process,
            Err(e) => {
                if let Some(mut companion) = companion {
                    companion.terminate().await;
                }
                return Err(e);
            }
        };
        self.await_ready(process, companion, port, &base_path, tag)
            .await
    }

    /// 轮询就绪；失败时先终止已启动的进程再返回错误
    async fn await_ready(
        &self,
        mut process: ProcessHandle,
        mut companion: Option<ProcessHandle>,
        port: u16,
        base_path: &str,
        tag: &str,
    ) -> AppResult<RunningServer> {
        let base_url = format!("http://{}:{}{}", self.settings.bind_host, port, base_path);
        match wait_until_ready(
            &mut process,
            &self.http,
            &base_url,
            port,
            self.settings.poll,
            tag,
        )
        .await
        {
            Ok(()) => Ok(RunningServer {
                base_url,
                port,
                process,
                companion,
            }),
            Err(e) => {
                process.terminate().await;
                if let Some(companion) = companion.as_mut() {
                    companion.terminate().await;
                }
                Err(e)
            }
        }
    }

    /// 项目带 db.json 时启动 mock 后端：优先项目自带的 server.js，否则使用 json-server
    async fn start_mock_api(&self, root: &Path, tag: &str) -> AppResult<Option<ProcessHandle>> {
        if !root.join("db.json").is_file() {
            return Ok(None);
        }

        let command = if root.join("server.js").is_file() {
            info!("[{}] 启动项目自带的 mock 后端 (server.js)...", tag);
            CommandSpec::new(&self.settings.node_bin).arg("server.js")
        } else {
            info!(
                "[{}] 启动 json-server mock 后端 (端口 {})...",
                tag, self.settings.mock_api_port
            );
            CommandSpec::new(&self.settings.npx_bin)
                .args(["json-server", "--watch", "db.json", "--port"])
                .arg(self.settings.mock_api_port.to_string())
        };

        let process = command.current_dir(root).spawn(
            format!("mock{}", tag),
            OutputSink::LogFile(root.join("json-server.log")),
        )?;
        sleep(self.settings.mock_api_grace).await;
        Ok(Some(process))
    }

    async fn local_install(&self, root: &Path, tag: &str) {
        let result = CommandSpec::new(&self.settings.npm_bin)
            .args(["install", "--no-audit", "--no-fund", "--no-progress"])
            .current_dir(root)
            .run_to_completion()
            .await;
        match result {
            Ok(done) if done.success() => debug!("[{}] 本地安装完成", tag),
            Ok(done) => warn!("[{}] ⚠️ 本地安装退出码 {:?}", tag, done.code),
            Err(e) => warn!("[{}] ⚠️ 本地安装失败: {}", tag, e),
        }
    }
}

/// 按固定间隔探测：进程已退出 → 失败；HTTP 有任何响应 → 就绪；次数用尽 → 超时
pub async fn wait_until_ready(
    process: &mut ProcessHandle,
    client: &reqwest::Client,
    url: &str,
    port: u16,
    policy: PollPolicy,
    tag: &str,
) -> AppResult<()> {
    let result = poll_until(policy, |attempt| {
        let exited = process.exit_code().map_err(|e| e.to_string());
        let request = client.get(url).send();
        let tag = tag.to_string();
        async move {
            match exited {
                Ok(Some(code)) => {
                    warn!("[{}] 服务进程提前退出，退出码 {:?}", tag, code);
                    return Attempt::Abort(LaunchError::ExitedEarly { port, code });
                }
                Err(e) => return Attempt::Abort(LaunchError::Setup(e)),
                Ok(None) => {}
            }
            if attempt % 10 == 0 {
                info!("[{}] ⏳ 仍在等待服务启动... ({} 次)", tag, attempt);
            }
            match request.await {
                Ok(_) => Attempt::Ready(()),
                Err(_) => Attempt::Retry,
            }
        }
    })
    .await;

    match result {
        Ok(()) => {
            info!("[{}] ✓ 服务已就绪: {}", tag, url);
            Ok(())
        }
        Err(PollError::Aborted(e)) => Err(e.into()),
        Err(PollError::TimedOut { attempts }) => {
            warn!("[{}] 服务启动超时 ({} 次)", tag, attempts);
            Err(LaunchError::TimedOut { port, attempts }.into())
        }
    }
}

/// 从 homepage 字段推导 URL 前缀：支持绝对 URL 与以 / 开头的路径，去掉一个结尾斜杠
pub fn base_path_from_homepage(homepage: Option<&str>) -> String {
    let Some(homepage) = homepage.map(str::trim) else {
        return String::new();
    };

    let path = if homepage.starts_with("http") {
        match reqwest::Url::parse(homepage) {
            Ok(url) => url.path().to_string(),
            Err(e) => {
                warn!("无法解析 homepage URL {}: {}", homepage, e);
                return String::new();
            }
        }
    } else if homepage.starts_with('/') {
        homepage.to_string()
    } else {
        return String::new();
    };

    match path.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => path,
    }
}

/// 开发服务器环境变量：不打开浏览器、固定主机与端口、关闭交互提示
pub fn dev_server_env(port: u16, bind_host: &str) -> Vec<(&'static str, String)> {
    vec![
        ("PORT", port.to_string()),
        ("BROWSER", "none".to_string()),
        ("HOST", bind_host.to_string()),
        ("CI", "true".to_string()),
        ("WDS_SOCKET_PORT", port.to_string()),
        ("SKIP_PREFLIGHT_CHECK", "true".to_string()),
        ("NODE_OPTIONS", "--openssl-legacy-provider".to_string()),
    ]
}

/// 分配一个空闲的本地端口
pub fn allocate_port() -> AppResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| LaunchError::Setup(format!("无法分配端口: {}", e)))?;
    let port = listener.local_addr()?.port();
    Ok(port)
}

async fn read_manifest(root: &Path) -> PackageManifest {
    match tokio::fs::read_to_string(root.join("package.json")).await {
        Ok(content) => PackageManifest::from_json(&content).unwrap_or_else(|e| {
            warn!("无法解析 {}/package.json: {}", root.display(), e);
            PackageManifest::default()
        }),
        Err(e) => {
            warn!("无法读取 {}/package.json: {}", root.display(), e);
            PackageManifest::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_path_from_absolute_url() {
        assert_eq!(
            base_path_from_homepage(Some("https://user.github.io/portfolio/")),
            "/portfolio"
        );
        assert_eq!(base_path_from_homepage(Some("https://example.com/")), "");
        assert_eq!(base_path_from_homepage(Some("http://example.com")), "");
    }

    #[test]
    fn test_base_path_from_relative_path() {
        assert_eq!(base_path_from_homepage(Some("/app/")), "/app");
        assert_eq!(base_path_from_homepage(Some("/app")), "/app");
        assert_eq!(base_path_from_homepage(Some("/")), "");
        assert_eq!(base_path_from_homepage(Some(".")), "");
        assert_eq!(base_path_from_homepage(None), "");
    }

    #[test]
    fn test_start_script_prefers_dev() {
        let both = PackageManifest::from_json(
            r#"{"scripts": {"dev": "vite", "start": "react-scripts start"}}"#,
        )
        .unwrap();
        assert_eq!(StartScript::select(&both), StartScript::Dev);

        let cra = PackageManifest::from_json(r#"{"scripts": {"start": "react-scripts start"}}"#)
            .unwrap();
        assert_eq!(StartScript::select(&cra), StartScript::Start);

        assert_eq!(
            StartScript::select(&PackageManifest::default()),
            StartScript::Dev
        );
    }

    #[test]
    fn test_dev_server_env_disables_browser() {
        let env = dev_server_env(4321, "127.0.0.1");
        assert!(env.contains(&("BROWSER", "none".to_string())));
        assert!(env.contains(&("PORT", "4321".to_string())));
        assert!(env.contains(&("CI", "true".to_string())));
        assert!(env.contains(&("HOST", "127.0.0.1".to_string())));
    }

    #[test]
    fn test_allocate_port() {
        let port = allocate_port().unwrap();
        assert!(port > 1024);
    }

    #[cfg(unix)]
    mod readiness {
        use super::*;

        fn fast(max_attempts: u32) -> PollPolicy {
            PollPolicy::new(Duration::from_millis(20), max_attempts)
        }

        #[tokio::test]
        async fn test_process_exit_is_reported_with_code() {
            let mut process = CommandSpec::new("sh")
                .args(["-c", "exit 7"])
                .spawn("exit-early", OutputSink::Null)
                .unwrap();
            let port = allocate_port().unwrap();
            let url = format!("http://127.0.0.1:{}", port);

            let err = wait_until_ready(
                &mut process,
                &reqwest::Client::new(),
                &url,
                port,
                fast(100),
                "test",
            )
            .await
            .unwrap_err();

            assert!(matches!(
                err,
                crate::error::AppError::Launch(LaunchError::ExitedEarly { code: Some(7), .. })
            ));
            assert!(err.to_string().contains("退出码 7"));
        }

        #[tokio::test]
        async fn test_unreachable_server_times_out() {
            let mut process = CommandSpec::new("sleep")
                .arg("30")
                .spawn("silent", OutputSink::Null)
                .unwrap();
            let port = allocate_port().unwrap();
            let url = format!("http://127.0.0.1:{}", port);

            let err = wait_until_ready(
                &mut process,
                &reqwest::Client::new(),
                &url,
                port,
                fast(3),
                "test",
            )
            .await
            .unwrap_err();
            process.terminate().await;

            assert!(matches!(
                err,
                crate::error::AppError::Launch(LaunchError::TimedOut { attempts: 3, .. })
            ));
        }

        #[tokio::test]
        async fn test_reachable_server_is_ready() {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let app = axum::Router::new().route("/", axum::routing::get(|| async { "Hello" }));
            let server = tokio::spawn(async move {
                let _ = axum::serve(listener, app).await;
            });

            let mut process = CommandSpec::new("sleep")
                .arg("30")
                .spawn("ready", OutputSink::Null)
                .unwrap();
            let url = format!("http://127.0.0.1:{}", port);

            let result = wait_until_ready(
                &mut process,
                &reqwest::Client::new(),
                &url,
                port,
                fast(50),
                "test",
            )
            .await;
            process.terminate().await;
            server.abort();

            assert!(result.is_ok());
        }
    }
    #[cfg(unix)]
    mod launch {
        use super::*;
        use crate::error::AppError;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use tempfile::TempDir;

        /// 假命令：记录参数与环境变量后执行 `body`
        fn fake_bin(dir: &Path, name: &str, body: &str) -> PathBuf {
            let script = dir.join(name);
            fs::write(
                &script,
                format!(
                    "#!/bin/sh\necho \"$*\" >> '{argv}'\necho \"PORT=$PORT HOST=$HOST BROWSER=$BROWSER CI=$CI\" >> '{env}'\n{body}\n",
                    argv = dir.join(format!("{}-argv.log", name)).display(),
                    env = dir.join(format!("{}-env.log", name)).display(),
                    body = body,
                ),
            )
            .unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            script
        }

        fn launcher(dir: &Path, npm: &Path, npx: &Path) -> ServerLauncher {
            let settings = LaunchSettings {
                bind_host: "127.0.0.1".to_string(),
                poll: PollPolicy::new(Duration::from_millis(20), 250),
                mock_api_port: 8000,
                mock_api_grace: Duration::from_millis(100),
                npm_bin: npm.display().to_string(),
                npx_bin: npx.display().to_string(),
                node_bin: "node".to_string(),
            };
            let master = Arc::new(MasterStore::new(
                dir.join("master"),
                npm.display().to_string(),
            ));
            ServerLauncher::new(settings, master).unwrap()
        }

        fn read(path: PathBuf) -> String {
            fs::read_to_string(path).unwrap_or_default()
        }

        /// 进程是否存活（僵尸进程视为已退出）
        fn process_alive(pid: i32) -> bool {
            match fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Ok(stat) => !stat
                    .rsplit(')')
                    .next()
                    .is_some_and(|rest| rest.trim_start().starts_with('Z')),
                Err(_) if Path::new("/proc").exists() => false,
                Err(_) => nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok(),
            }
        }

        async fn wait_gone(pid: i32) -> bool {
            for _ in 0..100 {
                if !process_alive(pid) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            false
        }

        fn dynamic_project(dir: &Path, manifest: &str) -> ProjectInfo {
            let root = dir.join("project");
            fs::create_dir_all(&root).unwrap();
            fs::write(root.join("package.json"), manifest).unwrap();
            ProjectInfo::new(root, ProjectKind::Dynamic)
        }

        #[tokio::test]
        async fn test_static_server_exit_is_reported() {
            let dir = TempDir::new().unwrap();
            let npx = fake_bin(dir.path(), "npx", "exit 3");
            let npm = fake_bin(dir.path(), "npm", "exit 0");
            let root = dir.path().join("site");
            fs::create_dir_all(&root).unwrap();
            fs::write(root.join("index.html"), "<h1>Hello</h1>").unwrap();
            let port = allocate_port().unwrap();

            let err = launcher(dir.path(), &npm, &npx)
                .launch(&ProjectInfo::new(root.clone(), ProjectKind::Static), port)
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                AppError::Launch(LaunchError::ExitedEarly { code: Some(3), .. })
            ));
            assert_eq!(
                read(dir.path().join("npx-argv.log")).trim(),
                format!("-y serve . -p {}", port)
            );
            assert!(root.join("static-server.log").exists());
        }

        #[tokio::test]
        async fn test_dev_script_gets_port_host_and_env() {
            let dir = TempDir::new().unwrap();
            let npm = fake_bin(dir.path(), "npm", "exit 3");
            let npx = fake_bin(dir.path(), "npx", "exit 0");
            let project = dynamic_project(dir.path(), r#"{"scripts": {"dev": "vite"}}"#);
            let port = allocate_port().unwrap();

            let err = launcher(dir.path(), &npm, &npx)
                .launch(&project, port)
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                AppError::Launch(LaunchError::ExitedEarly { code: Some(3), .. })
            ));
            assert!(err.to_string().contains("退出码 3"));

            // master 没有 node_modules，链接失败后先做一次本地安装
            let argv = read(dir.path().join("npm-argv.log"));
            let calls: Vec<&str> = argv.lines().collect();
            assert_eq!(calls.len(), 2);
            assert!(calls[0].starts_with("install"));
            assert_eq!(calls[1], format!("run dev -- --port {} --host", port));

            let env = read(dir.path().join("npm-env.log"));
            assert_eq!(
                env.lines().last().unwrap(),
                format!("PORT={} HOST=127.0.0.1 BROWSER=none CI=true", port)
            );
            assert!(project.root.join("dev-server.log").exists());
        }

        #[tokio::test]
        async fn test_start_script_has_no_extra_arguments() {
            let dir = TempDir::new().unwrap();
            let npm = fake_bin(dir.path(), "npm", "exit 1");
            let npx = fake_bin(dir.path(), "npx", "exit 0");
            let project = dynamic_project(
                dir.path(),
                r#"{"scripts": {"start": "react-scripts start"}}"#,
            );

            let err = launcher(dir.path(), &npm, &npx)
                .launch(&project, allocate_port().unwrap())
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                AppError::Launch(LaunchError::ExitedEarly { code: Some(1), .. })
            ));
            let argv = read(dir.path().join("npm-argv.log"));
            assert_eq!(argv.lines().last().unwrap(), "run start");
        }

        #[tokio::test]
        async fn test_mock_api_is_stopped_when_dev_server_fails() {
            let dir = TempDir::new().unwrap();
            let pid_file = dir.path().join("mock.pid");
            let npx = fake_bin(
                dir.path(),
                "npx",
                &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
            );
            let npm = fake_bin(dir.path(), "npm", "exit 3");
            let project = dynamic_project(dir.path(), r#"{"scripts": {"dev": "vite"}}"#);
            fs::write(project.root.join("db.json"), r#"{"posts": []}"#).unwrap();

            let err = launcher(dir.path(), &npm, &npx)
                .launch(&project, allocate_port().unwrap())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                AppError::Launch(LaunchError::ExitedEarly { code: Some(3), .. })
            ));

            assert_eq!(
                read(dir.path().join("npx-argv.log")).trim(),
                "json-server --watch db.json --port 8000"
            );
            let mock_pid: i32 = read(pid_file).trim().parse().unwrap();
            assert!(
                wait_gone(mock_pid).await,
                "dev server 失败后 mock 后端仍在运行"
            );
        }

        #[tokio::test]
        async fn test_ready_static_server_shuts_down() {
            let dir = TempDir::new().unwrap();
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let app = axum::Router::new().route("/", axum::routing::get(|| async { "Hello" }));
            let server = tokio::spawn(async move {
                let _ = axum::serve(listener, app).await;
            });
            // 假 serve 只负责存活，HTTP 由上面的测试服务器应答
            let npx = fake_bin(dir.path(), "npx", "exec sleep 30");
            let npm = fake_bin(dir.path(), "npm", "exit 0");
            let root = dir.path().join("site");
            fs::create_dir_all(&root).unwrap();

            let mut running = launcher(dir.path(), &npm, &npx)
                .launch(&ProjectInfo::new(root, ProjectKind::Static), port)
                .await
                .unwrap();
            assert_eq!(running.base_url, format!("http://127.0.0.1:{}", port));
            let pid = running.process.pid().unwrap() as i32;
            assert!(process_alive(pid));

            running.shutdown().await;
            server.abort();
            assert!(wait_gone(pid).await);
        }
    }
}
