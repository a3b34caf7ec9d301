//! 合并请求工具：提交工作区改动、推送任务分支，并通过 GitLab REST API 创建 Merge Request

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::config::GitlabSection;
use crate::tools::workspace::validate_branch;
use crate::tools::{CommandOutput, Tool, WorkspaceManager};

/// GitLab 创建 MR 的响应（只取用到的字段）
#[derive(Debug, Deserialize)]
struct MergeRequestCreated {
    iid: u64,
    web_url: String,
}

pub struct CreateMergeRequestTool {
    workspaces: Arc<WorkspaceManager>,
    client: Client,
    api_url: String,
    default_token: Option<String>,
}

impl CreateMergeRequestTool {
    pub fn new(workspaces: Arc<WorkspaceManager>, gitlab: &GitlabSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            workspaces,
            client,
            api_url: gitlab.api_url.clone(),
            default_token: gitlab.resolved_token(),
        }
    }

    fn merge_requests_url(&self, project_id: &str) -> Result<Url, String> {
        let mut url =
            Url::parse(&self.api_url).map_err(|e| format!("Invalid gitlab.api_url: {e}"))?;
        url.path_segments_mut()
            .map_err(|_| format!("Invalid gitlab.api_url: {}", self.api_url))?
            .pop_if_empty()
            .push("projects")
            .push(project_id)
            .push("merge_requests");
        Ok(url)
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput, String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.workspaces.runner().run("git", &args, Some(dir)).await
    }

    /// 暂存并提交工作区全部改动；没有改动时返回 Ok(false)
    async fn commit_changes(&self, dir: &Path, message: &str) -> Result<bool, String> {
        let add = self.git(dir, &["add", "-A"]).await?;
        if !add.success {
            return Err(format!("git add failed: {}", add.stderr.trim()));
        }
        let commit = self.git(dir, &["commit", "-m", message]).await?;
        if commit.success {
            return Ok(true);
        }
        let text = format!("{}\n{}", commit.stdout, commit.stderr);
        if text.contains("nothing to commit") || text.contains("no changes added to commit") {
            Ok(false)
        } else {
            Err(format!("git commit failed: {}", commit.into_text().trim()))
        }
    }

    async fn push_branch(&self, dir: &Path, branch: &str) -> Result<(), String> {
        let out = self
            .git(dir, &["push", "--force-with-lease", "-u", "origin", branch])
            .await?;
        if out.success {
            Ok(())
        } else {
            Err(format!("git push failed: {}", out.stderr.trim()))
        }
    }
}

/// project_id 可以是数字，也可以是 "group/project" 路径
fn project_id_arg(args: &Value) -> Option<String> {
    match args.get("project_id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[async_trait]
impl Tool for CreateMergeRequestTool {
    fn name(&self) -> &str {
        "create_merge_request"
    }

    fn description(&self) -> &str {
        "Commit all workspace changes, push the task branch and open a GitLab merge request \
         into the base branch. Use after a successful, user-confirmed apply. Returns the merge request URL."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "repo_dir": { "type": "string", "description": "Workspace path returned by prepare_repo_for_task" },
                "branch_name": { "type": "string", "description": "Task branch to merge" },
                "project_id": { "type": ["integer", "string"], "description": "GitLab project id or path" },
                "gitlab_token": { "type": "string", "description": "Optional; defaults to the configured token" },
                "title": { "type": "string", "description": "Optional merge request title" },
                "description": { "type": "string", "description": "Optional merge request description" }
            },
            "required": ["repo_dir", "branch_name", "project_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let dir = self
            .workspaces
            .resolve(args.get("repo_dir").and_then(|v| v.as_str()).unwrap_or(""))?;
        let branch = args
            .get("branch_name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .ok_or("Missing required parameter: branch_name")?;
        validate_branch(branch)?;
        let project_id = project_id_arg(&args).ok_or("Missing required parameter: project_id")?;
        let token = args
            .get("gitlab_token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .or_else(|| self.default_token.clone())
            .ok_or("No GitLab token: pass gitlab_token or set GITLAB_TOKEN")?;
        let target = self.workspaces.defaults().base_branch.clone();
        let title = args
            .get("title")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("Agent task: {branch}"));
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("Created by infra-agent after a confirmed terraform apply.");

        {
            let _guard = self.workspaces.lock(&dir).await;
            if !self.commit_changes(&dir, &title).await? {
                return Ok(format!(
                    "Nothing to commit in {}; no merge request was created.",
                    dir.display()
                ));
            }
            self.push_branch(&dir, branch).await?;
        }

        let url = self.merge_requests_url(&project_id)?;
        tracing::info!(project = %project_id, branch = %branch, "creating merge request");
        let resp = self
            .client
            .post(url)
            .header("PRIVATE-TOKEN", token)
            .json(&serde_json::json!({
                "source_branch": branch,
                "target_branch": target,
                "title": title,
                "description": description,
                "remove_source_branch": true,
            }))
            .send()
            .await
            .map_err(|e| format!("GitLab request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("GitLab API returned {status}: {}", body.trim()));
        }
        let created: MergeRequestCreated = resp
            .json()
            .await
            .map_err(|e| format!("Unexpected GitLab response: {e}"))?;
        Ok(format!(
            "Merge request !{} created from {} into {}: {}",
            created.iid, branch, target, created.web_url
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{RecordingRunner, WorkspaceDefaults};

    fn tool(api_url: &str) -> CreateMergeRequestTool {
        let mgr = WorkspaceManager::new(
            "/tmp",
            WorkspaceDefaults {
                repo_url: "https://gitlab.com/acme/infra.git".into(),
                base_branch: "main".into(),
                new_branch: "agent-task".into(),
            },
            Arc::new(RecordingRunner::new()),
        );
        CreateMergeRequestTool::new(
            Arc::new(mgr),
            &GitlabSection {
                api_url: api_url.into(),
                token: Some("t".into()),
            },
        )
    }

    #[test]
    fn project_paths_are_percent_encoded() {
        let t = tool("https://gitlab.example.com/api/v4/");
        assert_eq!(
            t.merge_requests_url("42").unwrap().as_str(),
            "https://gitlab.example.com/api/v4/projects/42/merge_requests"
        );
        assert_eq!(
            t.merge_requests_url("acme/infra").unwrap().as_str(),
            "https://gitlab.example.com/api/v4/projects/acme%2Finfra/merge_requests"
        );
    }

    #[test]
    fn project_id_accepts_number_or_path() {
        assert_eq!(project_id_arg(&serde_json::json!({"project_id": 7})).as_deref(), Some("7"));
        assert_eq!(
            project_id_arg(&serde_json::json!({"project_id": "acme/infra"})).as_deref(),
            Some("acme/infra")
        );
        assert!(project_id_arg(&serde_json::json!({"project_id": ""})).is_none());
        assert!(project_id_arg(&serde_json::json!({})).is_none());
    }
}
