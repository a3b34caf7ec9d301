//! 子进程执行
//!
//! git / terraform 调用统一经过 CommandRunner，便于在测试中替换为记录型实现。
//! 启动失败返回 Err；进程非零退出不算 Err，由调用方决定如何把 stdout / stderr 交给模型。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;

/// 一次子进程调用的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// 成功取 stdout，失败取 stderr（stderr 为空时退回 stdout）
    pub fn into_text(self) -> String {
        if self.success || self.stderr.trim().is_empty() {
            self.stdout
        } else {
            self.stderr
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, String>;
}

/// 真实子进程；被取消（如工具超时）时随 future 一起被 kill
#[derive(Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, String> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(program = %program, args = ?args, cwd = ?cwd, "spawn");
        let output = cmd
            .output()
            .await
            .map_err(|e| format!("Failed to run {}: {}", program, e))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// 一次被记录的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl RecordedCommand {
    /// "program arg0 arg1 ..."，便于断言
    pub fn line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// 记录型 Runner：不启动任何进程，按「program 首参数」前缀返回预设结果，默认返回成功空输出
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<RecordedCommand>>,
    responses: Mutex<Vec<(String, Result<CommandOutput, String>)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// prefix 与调用行做前缀匹配，例如 "terraform plan"、"git push"
    pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
        if let Ok(mut r) = self.responses.lock() {
            r.push((prefix.to_string(), Ok(output)));
        }
        self
    }

    /// 模拟启动失败（例如可执行文件不存在）
    pub fn fail_spawn(self, prefix: &str, message: &str) -> Self {
        if let Ok(mut r) = self.responses.lock() {
            r.push((prefix.to_string(), Err(message.to_string())));
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCommand::line).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput, String> {
        let recorded = RecordedCommand {
            program: program.to_string(),
            args: args.to_vec(),
            cwd: cwd.map(Path::to_path_buf),
        };
        let line = recorded.line();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(recorded);
        }
        let responses = self.responses.lock().map_err(|e| e.to_string())?;
        responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| Ok(CommandOutput::ok("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_text_prefers_stderr_on_failure() {
        assert_eq!(CommandOutput::ok("planned").into_text(), "planned");
        assert_eq!(CommandOutput::failed(1, "boom").into_text(), "boom");
        let quiet_failure = CommandOutput {
            success: false,
            code: Some(2),
            stdout: "only stdout".into(),
            stderr: " ".into(),
        };
        assert_eq!(quiet_failure.into_text(), "only stdout");
    }

    #[tokio::test]
    async fn recording_runner_matches_prefixes() {
        let runner = RecordingRunner::new()
            .respond("terraform plan", CommandOutput::ok("No changes."))
            .fail_spawn("tofu", "not found");
        let out = runner
            .run("terraform", &["plan".into()], Some(Path::new("/w")))
            .await
            .unwrap();
        assert_eq!(out.stdout, "No changes.");
        assert!(runner.run("tofu", &[], None).await.is_err());
        let default = runner.run("git", &["status".into()], None).await.unwrap();
        assert!(default.success);
        assert_eq!(
            runner.lines(),
            vec!["terraform plan", "tofu", "git status"]
        );
        assert_eq!(runner.calls()[0].cwd.as_deref(), Some(Path::new("/w")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_captures_exit_status() {
        let runner = ProcessRunner;
        let out = runner
            .run("sh", &["-c".into(), "echo hi; exit 3".into()], None)
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
    }
}
