//! 子进程管理 - 基础设施层
//!
//! 持有开发服务器、静态服务器、mock 后端等子进程，只暴露"启动 / 查询退出 / 终止"能力。
//! Unix 下每个进程独占一个进程组，终止时整组 SIGKILL；Windows 下使用 `taskkill /f /t`。

use crate::error::{AppResult, LaunchError};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// 子进程输出去向
#[derive(Debug, Clone)]
pub enum OutputSink {
    /// 追加写入日志文件（stdout 与 stderr 合并）
    LogFile(PathBuf),
    /// 丢弃
    Null,
}

/// 待启动的命令
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// 用于日志和错误信息的命令行文本
    pub fn display(&self) -> String {
        let mut text = self.program.clone();
        for arg in &self.args {
            text.push(' ');
            text.push_str(&arg.to_string_lossy());
        }
        text
    }

    /// 构建 tokio 命令；Windows 下 npm/npx 是 .cmd 脚本，需要经过 `cmd /C`
    fn build(&self) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.program);
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = Command::new(&self.program);

        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    /// 启动为长期运行的子进程
    pub fn spawn(&self, label: impl Into<String>, sink: OutputSink) -> AppResult<ProcessHandle> {
        let mut cmd = self.build();
        cmd.stdin(Stdio::null());

        match &sink {
            OutputSink::LogFile(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| self.spawn_failed(source))?;
                let err_file = file.try_clone().map_err(|source| self.spawn_failed(source))?;
                cmd.stdout(Stdio::from(file)).stderr(Stdio::from(err_file));
            }
            OutputSink::Null => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| self.spawn_failed(source))?;
        let label = label.into();
        debug!("[{}] 已启动: {} (pid: {:?})", label, self.display(), child.id());

        Ok(ProcessHandle {
            pid: child.id(),
            label,
            child,
            terminated: false,
        })
    }

    /// 运行到结束，返回退出码与 stderr 内容
    pub async fn run_to_completion(&self) -> AppResult<CompletedCommand> {
        let mut cmd = self.build();
        cmd.stdin(Stdio::null());
        let output = cmd.output().await.map_err(|source| self.spawn_failed(source))?;
        Ok(CompletedCommand {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn_failed(&self, source: std::io::Error) -> crate::error::AppError {
        LaunchError::SpawnFailed {
            command: self.display(),
            source,
        }
        .into()
    }
}

/// 已结束命令的结果
#[derive(Debug, Clone)]
pub struct CompletedCommand {
    pub code: Option<i32>,
    pub stderr: String,
}

impl CompletedCommand {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// 正在运行的子进程
///
/// 每个句柄只终止一次；调用方应显式 `terminate()`，`Drop` 只做兜底的同步强杀。
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    child: Child,
    pid: Option<u32>,
    terminated: bool,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// 进程是否已退出；已退出时返回 `Some(退出码)`，被信号杀死时退出码为 None
    pub fn exit_code(&mut self) -> AppResult<Option<Option<i32>>> {
        Ok(self.child.try_wait()?.map(|status| status.code()))
    }

    /// 强制终止进程及其子进程
    ///
    /// 组长退出后进程组里仍可能有存活成员（例如 npm 包装脚本已退出而 dev server 还在），
    /// 所以无论组长是否存活都要清理整个进程组。
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        debug!("[{}] 终止进程 (pid: {:?})", self.label, self.pid);
        if let Some(pid) = self.pid {
            kill_tree(pid).await;
        }

        if let Ok(Some(_)) = self.child.try_wait() {
            debug!("[{}] 组长进程已退出", self.label);
            return;
        }
        // 进程树命令失败时仍然保证直接子进程被杀掉
        let _ = self.child.start_kill();

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("[{}] 等待进程退出失败: {}", self.label, e),
            Err(_) => warn!("[{}] 进程在 5 秒内未退出", self.label),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        if let Some(pid) = self.pid {
            kill_tree_blocking(pid);
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        warn!("[{}] 句柄被丢弃时进程仍在运行，强制终止", self.label);
        let _ = self.child.start_kill();
    }
}

#[cfg(unix)]
async fn kill_tree(pid: u32) {
    kill_tree_blocking(pid);
}

#[cfg(unix)]
fn kill_tree_blocking(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // 以 process_group(0) 启动，进程组号即 pid
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg({}) 失败: {}", pid, e);
    }
}

#[cfg(windows)]
async fn kill_tree(pid: u32) {
    let result = Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        debug!("taskkill {} 失败: {}", pid, e);
    }
}

#[cfg(windows)]
fn kill_tree_blocking(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exit_code_is_observed() {
        let mut handle = CommandSpec::new("sh")
            .args(["-c", "exit 3"])
            .spawn("exit-test", OutputSink::Null)
            .unwrap();

        let mut code = None;
        for _ in 0..100 {
            if let Some(c) = handle.exit_code().unwrap() {
                code = Some(c);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(code, Some(Some(3)));
        handle.terminate().await;
    }

    #[tokio::test]
    async fn test_terminate_kills_long_running_process() {
        let mut handle = CommandSpec::new("sleep")
            .arg("30")
            .spawn("sleep-test", OutputSink::Null)
            .unwrap();
        assert!(handle.exit_code().unwrap().is_none());

        handle.terminate().await;
        assert!(handle.exit_code().unwrap().is_some());
        // 第二次调用是空操作
        handle.terminate().await;
    }

    /// 进程是否存活（僵尸进程视为已退出）
    fn alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) if Path::new("/proc").exists() => false,
            Err(_) => nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok(),
        }
    }

    /// 启动一个立即退出、但在后台留下 sleep 的组长，返回句柄和后台进程 pid
    async fn spawn_orphaning_leader(dir: &Path, label: &str) -> (ProcessHandle, i32) {
        let pid_file = dir.join("bg.pid");
        let script = format!("sleep 30 & echo $! > '{}'; exit 0", pid_file.display());
        let mut handle = CommandSpec::new("sh")
            .args(["-c", script.as_str()])
            .spawn(label, OutputSink::Null)
            .unwrap();

        for _ in 0..100 {
            if handle.exit_code().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let bg: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        (handle, bg)
    }

    async fn wait_gone(pid: i32) -> bool {
        for _ in 0..100 {
            if !alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_terminate_kills_group_after_leader_exits() {
        let dir = tempfile::TempDir::new().unwrap();
        let (mut handle, bg) = spawn_orphaning_leader(dir.path(), "orphan-test").await;
        assert_eq!(handle.exit_code().unwrap(), Some(Some(0)));
        assert!(alive(bg), "后台 sleep 应仍在运行");

        handle.terminate().await;
        assert!(wait_gone(bg).await, "组长退出后进程组成员未被清理");
    }

    #[tokio::test]
    async fn test_drop_kills_group_after_leader_exits() {
        let dir = tempfile::TempDir::new().unwrap();
        let (handle, bg) = spawn_orphaning_leader(dir.path(), "orphan-drop-test").await;
        assert!(alive(bg));

        drop(handle);
        assert!(wait_gone(bg).await);
    }

    #[tokio::test]
    async fn test_output_goes_to_log_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("dev-server.log");
        let result = CommandSpec::new("sh")
            .args(["-c", "echo hello-from-child"])
            .spawn("log-test", OutputSink::LogFile(log.clone()))
            .unwrap();

        let mut handle = result;
        for _ in 0..100 {
            if handle.exit_code().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("hello-from-child"));
    }

    #[tokio::test]
    async fn test_run_to_completion_captures_stderr() {
        let done = CommandSpec::new("sh")
            .args(["-c", "echo boom >&2; exit 2"])
            .run_to_completion()
            .await
            .unwrap();
        assert!(!done.success());
        assert_eq!(done.code, Some(2));
        assert!(done.stderr.contains("boom"));
    }
}
