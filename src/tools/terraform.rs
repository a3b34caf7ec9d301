//! Terraform 工具：plan 与带确认闸门的 apply
//!
//! apply 是唯一会改动基础设施的操作，只有参数 confirmed 严格为布尔 true 时才会启动进程；
//! 字符串 "true"、缺省、任何文本推断都视为未确认。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, WorkspaceManager};

/// 未确认时返回给模型的固定文本
pub const APPLY_NOT_CONFIRMED: &str = "User did not confirm apply.";

fn repo_dir_arg(args: &Value) -> &str {
    args.get("repo_dir").and_then(|v| v.as_str()).unwrap_or("")
}

fn terraform_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// terraform_plan：init 后执行 plan，返回原始输出
pub struct TerraformPlanTool {
    workspaces: Arc<WorkspaceManager>,
}

impl TerraformPlanTool {
    pub fn new(workspaces: Arc<WorkspaceManager>) -> Self {
        Self { workspaces }
    }
}

#[async_trait]
impl Tool for TerraformPlanTool {
    fn name(&self) -> &str {
        "terraform_plan"
    }

    fn description(&self) -> &str {
        "Run `terraform init` and `terraform plan` in the workspace and return the raw plan output \
         (or the error output if planning failed). Read-only; safe to run at any time."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "repo_dir": { "type": "string", "description": "Workspace path returned by prepare_repo_for_task" }
            },
            "required": ["repo_dir"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let dir = self.workspaces.resolve(repo_dir_arg(&args))?;
        let _guard = self.workspaces.lock(&dir).await;
        let runner = self.workspaces.runner();

        tracing::info!(dir = %dir.display(), "terraform plan");
        let init = runner
            .run(
                "terraform",
                &terraform_args(&["init", "-input=false", "-no-color"]),
                Some(&dir),
            )
            .await?;
        if !init.success {
            return Ok(format!("terraform init failed:\n{}", init.into_text()));
        }

        let plan = runner
            .run(
                "terraform",
                &terraform_args(&["plan", "-input=false", "-no-color"]),
                Some(&dir),
            )
            .await?;
        Ok(plan.into_text())
    }
}

/// terraform_apply：仅在 confirmed == true 时执行 apply -auto-approve
pub struct TerraformApplyTool {
    workspaces: Arc<WorkspaceManager>,
}

impl TerraformApplyTool {
    pub fn new(workspaces: Arc<WorkspaceManager>) -> Self {
        Self { workspaces }
    }
}

#[async_trait]
impl Tool for TerraformApplyTool {
    fn name(&self) -> &str {
        "terraform_apply"
    }

    fn description(&self) -> &str {
        "Apply the planned changes with `terraform apply -auto-approve`. This changes real infrastructure. \
         Set confirmed to true ONLY after the user has explicitly approved the plan in this conversation; \
         otherwise nothing is applied."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "repo_dir": { "type": "string", "description": "Workspace path returned by prepare_repo_for_task" },
                "confirmed": { "type": "boolean", "description": "true only if the user explicitly confirmed the apply" }
            },
            "required": ["repo_dir", "confirmed"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let confirmed = args.get("confirmed").and_then(Value::as_bool) == Some(true);
        if !confirmed {
            tracing::info!("terraform apply refused: not confirmed");
            return Ok(APPLY_NOT_CONFIRMED.to_string());
        }

        let dir = self.workspaces.resolve(repo_dir_arg(&args))?;
        let _guard = self.workspaces.lock(&dir).await;

        tracing::warn!(dir = %dir.display(), "terraform apply (confirmed)");
        let out = self
            .workspaces
            .runner()
            .run(
                "terraform",
                &terraform_args(&["apply", "-auto-approve", "-input=false", "-no-color"]),
                Some(&dir),
            )
            .await?;
        Ok(out.into_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CommandOutput, RecordingRunner, WorkspaceDefaults};
    use serde_json::json;

    fn setup(runner: Arc<RecordingRunner>) -> (tempfile::TempDir, Arc<WorkspaceManager>, String) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("infra");
        std::fs::create_dir_all(&dir).unwrap();
        let mgr = WorkspaceManager::new(
            tmp.path(),
            WorkspaceDefaults {
                repo_url: "https://gitlab.com/acme/infra.git".into(),
                base_branch: "main".into(),
                new_branch: "agent-task".into(),
            },
            runner,
        );
        (tmp, Arc::new(mgr), dir.to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn plan_runs_init_then_plan_and_returns_stdout() {
        let runner = Arc::new(
            RecordingRunner::new().respond("terraform plan", CommandOutput::ok("Plan: 1 to add")),
        );
        let (_tmp, mgr, dir) = setup(runner.clone());

        let out = TerraformPlanTool::new(mgr)
            .execute(json!({ "repo_dir": dir }))
            .await
            .unwrap();
        assert_eq!(out, "Plan: 1 to add");
        assert_eq!(
            runner.lines(),
            vec![
                "terraform init -input=false -no-color",
                "terraform plan -input=false -no-color"
            ]
        );
    }

    #[tokio::test]
    async fn plan_failure_is_returned_as_text() {
        let runner = Arc::new(RecordingRunner::new().respond(
            "terraform plan",
            CommandOutput::failed(1, "Error: Unsupported argument"),
        ));
        let (_tmp, mgr, dir) = setup(runner);

        let out = TerraformPlanTool::new(mgr)
            .execute(json!({ "repo_dir": dir }))
            .await
            .unwrap();
        assert!(out.contains("Unsupported argument"));
    }

    #[tokio::test]
    async fn plan_reports_init_failure_without_planning() {
        let runner = Arc::new(
            RecordingRunner::new()
                .respond("terraform init", CommandOutput::failed(1, "provider not found")),
        );
        let (_tmp, mgr, dir) = setup(runner.clone());

        let out = TerraformPlanTool::new(mgr)
            .execute(json!({ "repo_dir": dir }))
            .await
            .unwrap();
        assert!(out.starts_with("terraform init failed"));
        assert_eq!(runner.lines().len(), 1);
    }

    #[tokio::test]
    async fn apply_without_confirmation_never_spawns() {
        let runner = Arc::new(RecordingRunner::new());
        let (_tmp, mgr, dir) = setup(runner.clone());
        let tool = TerraformApplyTool::new(mgr);

        let refusals = [
            json!({ "repo_dir": dir, "confirmed": false }),
            json!({ "repo_dir": dir }),
            json!({ "repo_dir": dir, "confirmed": "true" }),
            json!({ "repo_dir": dir, "confirmed": 1 }),
            json!({ "repo_dir": "/definitely/not/a/workspace", "confirmed": false }),
        ];
        for args in refusals {
            assert_eq!(tool.execute(args).await.unwrap(), APPLY_NOT_CONFIRMED);
        }
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn confirmed_apply_runs_exactly_once() {
        let runner = Arc::new(RecordingRunner::new().respond(
            "terraform apply",
            CommandOutput::ok("Apply complete! Resources: 1 added"),
        ));
        let (_tmp, mgr, dir) = setup(runner.clone());

        let out = TerraformApplyTool::new(mgr)
            .execute(json!({ "repo_dir": dir, "confirmed": true }))
            .await
            .unwrap();
        assert_eq!(out, "Apply complete! Resources: 1 added");
        assert_eq!(
            runner.lines(),
            vec!["terraform apply -auto-approve -input=false -no-color"]
        );
    }

    #[tokio::test]
    async fn confirmed_apply_failure_returns_stderr() {
        let runner = Arc::new(RecordingRunner::new().respond(
            "terraform apply",
            CommandOutput::failed(1, "Error: creating S3 Bucket: AccessDenied"),
        ));
        let (_tmp, mgr, dir) = setup(runner);

        let out = TerraformApplyTool::new(mgr)
            .execute(json!({ "repo_dir": dir, "confirmed": true }))
            .await
            .unwrap();
        assert!(out.contains("AccessDenied"));
    }
}
