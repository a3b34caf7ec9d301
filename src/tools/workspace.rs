//! 工作区管理：仓库检出、分支准备与路径校验
//!
//! 每个仓库在 root 下占一个目录（目录名取自 repo URL 去掉 .git）。
//! 同一目录上的 prepare / plan / apply / 推送都经过按目录的互斥锁串行执行，避免并发破坏检出树。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::WorkspaceSection;
use crate::core::{KeyGuard, KeyedLocks};
use crate::tools::{CommandRunner, Tool};

/// prepare 的默认参数
#[derive(Debug, Clone)]
pub struct WorkspaceDefaults {
    pub repo_url: String,
    pub base_branch: String,
    pub new_branch: String,
}

impl From<&WorkspaceSection> for WorkspaceDefaults {
    fn from(cfg: &WorkspaceSection) -> Self {
        Self {
            repo_url: cfg.default_repo_url.clone(),
            base_branch: cfg.default_branch.clone(),
            new_branch: cfg.default_new_branch.clone(),
        }
    }
}

pub struct WorkspaceManager {
    root: PathBuf,
    defaults: WorkspaceDefaults,
    runner: Arc<dyn CommandRunner>,
    locks: KeyedLocks,
}

impl WorkspaceManager {
    pub fn new(
        root: impl AsRef<Path>,
        defaults: WorkspaceDefaults,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = if root.is_relative() {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        } else {
            root
        };
        Self {
            root,
            defaults,
            runner,
            locks: KeyedLocks::new(),
        }
    }

    pub fn from_config(cfg: &WorkspaceSection, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(cfg.resolved_root(), WorkspaceDefaults::from(cfg), runner)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn defaults(&self) -> &WorkspaceDefaults {
        &self.defaults
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// 检出仓库并切到从最新 base_branch 新建（或重置）的 new_branch，返回工作区绝对路径
    pub async fn prepare(
        &self,
        repo_url: &str,
        base_branch: &str,
        new_branch: &str,
    ) -> Result<PathBuf, String> {
        validate_branch(base_branch)?;
        validate_branch(new_branch)?;
        if repo_url.trim().is_empty() || repo_url.starts_with('-') {
            return Err(format!("Invalid repo_url: {repo_url:?}"));
        }
        let name = repo_name(repo_url)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| format!("Failed to create {}: {}", self.root.display(), e))?;
        let repo_dir = self.root.join(&name);
        let _guard = self.lock(&repo_dir).await;

        if !repo_dir.exists() {
            tracing::info!(repo = %repo_url, dir = %repo_dir.display(), "cloning workspace");
            let dir = repo_dir.to_string_lossy().to_string();
            self.git(&["clone", "--branch", base_branch, repo_url, &dir], &self.root)
                .await?;
        } else {
            tracing::info!(dir = %repo_dir.display(), base = %base_branch, "refreshing workspace");
            self.git(&["checkout", base_branch], &repo_dir).await?;
            self.git(&["pull", "--ff-only", "origin", base_branch], &repo_dir)
                .await?;
        }
        self.git(&["checkout", "-B", new_branch], &repo_dir).await?;

        Ok(repo_dir)
    }

    /// 校验模型传入的工作区路径：必须存在且位于 root 之下
    pub fn resolve(&self, repo_dir: &str) -> Result<PathBuf, String> {
        let raw = repo_dir.trim();
        if raw.is_empty() {
            return Err("Missing required parameter: repo_dir".to_string());
        }
        let path = PathBuf::from(raw);
        let path = if path.is_relative() {
            self.root.join(path)
        } else {
            path
        };
        let canonical = path
            .canonicalize()
            .map_err(|_| format!("Workspace not found: {raw}"))?;
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        if canonical.starts_with(&root) && canonical != root && canonical.is_dir() {
            Ok(canonical)
        } else {
            Err(format!("Path is not a workspace under {}: {raw}", root.display()))
        }
    }

    /// 独占某个工作区目录
    pub async fn lock(&self, repo_dir: &Path) -> KeyGuard<'_> {
        self.locks.lock(&self.lock_key(repo_dir)).await
    }

    fn lock_key(&self, repo_dir: &Path) -> String {
        let key = match repo_dir.canonicalize() {
            Ok(p) => p,
            Err(_) => {
                let root = self
                    .root
                    .canonicalize()
                    .unwrap_or_else(|_| self.root.clone());
                match repo_dir.file_name() {
                    Some(name) => root.join(name),
                    None => repo_dir.to_path_buf(),
                }
            }
        };
        key.to_string_lossy().into_owned()
    }

    async fn git(&self, args: &[&str], cwd: &Path) -> Result<String, String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let out = self.runner.run("git", &args, Some(cwd)).await?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(format!(
                "git {} failed: {}",
                args.first().map(String::as_str).unwrap_or(""),
                out.stderr.trim()
            ))
        }
    }
}

/// 从 repo URL 取目录名：https://host/group/infra.git -> infra，git@host:group/infra.git -> infra
pub fn repo_name(repo_url: &str) -> Result<String, String> {
    let trimmed = repo_url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(name.to_string())
    } else {
        Err(format!("Cannot derive repository name from {repo_url:?}"))
    }
}

/// 拒绝以 - 开头（会被 git 当作选项）、含空白或 .. 的分支名
pub fn validate_branch(name: &str) -> Result<(), String> {
    if name.is_empty()
        || name.starts_with('-')
        || name.contains("..")
        || name.chars().any(char::is_whitespace)
    {
        return Err(format!("Invalid branch name: {name:?}"));
    }
    Ok(())
}

/// prepare_repo_for_task：准备干净、最新的任务分支
pub struct PrepareWorkspaceTool {
    manager: Arc<WorkspaceManager>,
}

impl PrepareWorkspaceTool {
    pub fn new(manager: Arc<WorkspaceManager>) -> Self {
        Self { manager }
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl Tool for PrepareWorkspaceTool {
    fn name(&self) -> &str {
        "prepare_repo_for_task"
    }

    fn description(&self) -> &str {
        "Clone the repository under the workspace root (or update it if already present), \
         bring the base branch up to date, and check out a fresh task branch from it. \
         Returns the absolute workspace path to pass to the other tools. \
         All arguments are optional and default to the configured repository."
    }

    fn parameters_schema(&self) -> Value {
        let d = self.manager.defaults();
        serde_json::json!({
            "type": "object",
            "properties": {
                "repo_url": { "type": "string", "description": format!("Git URL (default {})", d.repo_url) },
                "base_branch": { "type": "string", "description": format!("Branch to start from (default {})", d.base_branch) },
                "new_branch": { "type": "string", "description": format!("Task branch to create or reset (default {})", d.new_branch) }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let d = self.manager.defaults();
        let repo_url = str_arg(&args, "repo_url").unwrap_or(&d.repo_url);
        let base_branch = str_arg(&args, "base_branch").unwrap_or(&d.base_branch);
        let new_branch = str_arg(&args, "new_branch").unwrap_or(&d.new_branch);

        let dir = self
            .manager
            .prepare(repo_url, base_branch, new_branch)
            .await?;
        Ok(dir.to_string_lossy().into_owned())
    }
}
