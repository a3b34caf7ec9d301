//! Agent 运行时
//!
//! AgentRuntime 是编排层看到的唯一接口：给定本轮输入与任务历史，返回最终文本。
//! ReactRuntime 用 Planner + ToolExecutor + RecoveryEngine 跑 ReAct 循环；
//! build_terraform_runtime / build_shell_runtime 按配置装配两个 HTTP 入口各自的智能体。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::{react_loop, Planner, ReactSession, ToolCallRecord};
use crate::tools::{
    tool_call_schema_json, CommandRunner, CreateMergeRequestTool, PrepareWorkspaceTool, ShellTool,
    TerraformApplyTool, TerraformPlanTool, Tool, ToolExecutor, ToolRegistry, WebSearchTool,
    WorkspaceDefaults, WorkspaceManager,
};

/// 单次运行结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub output: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// 智能体运行时：编排层通过它执行一轮对话
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, utterance: &str, history: &[Message]) -> Result<RunOutcome, AgentError>;
}

/// 基于 ReAct 循环的运行时，可被多个请求并发共享
pub struct ReactRuntime {
    planner: Planner,
    executor: ToolExecutor,
    recovery: RecoveryEngine,
    max_steps: usize,
    cancel_token: CancellationToken,
}

impl ReactRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        instructions: &str,
        registry: ToolRegistry,
        tool_timeout_secs: u64,
        max_steps: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        let system_prompt = system_prompt(instructions, &registry);
        Self {
            planner: Planner::new(llm, system_prompt),
            executor: ToolExecutor::new(registry, tool_timeout_secs),
            recovery: RecoveryEngine::new(),
            max_steps,
            cancel_token,
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    pub fn system_prompt(&self) -> &str {
        self.planner.base_system_prompt()
    }
}

#[async_trait]
impl AgentRuntime for ReactRuntime {
    async fn run(&self, utterance: &str, history: &[Message]) -> Result<RunOutcome, AgentError> {
        let session = ReactSession {
            planner: &self.planner,
            executor: &self.executor,
            recovery: &self.recovery,
            cancel_token: self.cancel_token.clone(),
            max_steps: self.max_steps,
        };
        let result = react_loop(&session, history, utterance).await?;
        Ok(RunOutcome {
            output: result.response,
            tool_calls: result.tool_calls,
        })
    }
}

/// 拼接 system prompt：角色说明 + 工具列表 + 调用格式
fn system_prompt(instructions: &str, registry: &ToolRegistry) -> String {
    format!(
        "{instructions}\n\n## Tools\n\nAvailable tools (JSON schema):\n{}\n\n\
         To call a tool, reply with ONLY one JSON object matching this schema:\n{}\n\
         Example: {{\"tool\": \"terraform_plan\", \"args\": {{\"repo_dir\": \"/path\"}}}}\n\
         After each call you receive an observation. When you are done, or need input from the user, \
         reply in plain text without any JSON.",
        registry.to_schema_json(),
        tool_call_schema_json(),
    )
}

pub const SHELL_INSTRUCTIONS: &str =
    "You are an agent that can run shell commands on behalf of the user.";

/// Terraform 智能体的工作流说明；MCP 工具按名字前缀列出
pub fn terraform_instructions(defaults: &WorkspaceDefaults, mcp_tools: &[String]) -> String {
    let mcp_hint = if mcp_tools.is_empty() {
        "No MCP tools are configured; rely on terraform_plan output to understand the code.".to_string()
    } else {
        format!("MCP tools available: {}.", mcp_tools.join(", "))
    };
    format!(
        "You are an expert Terraform DevOps agent. Your primary goal is to manage AWS infrastructure \
         by modifying Terraform code in a GitLab repository.\n\n\
         **Default Repository**: Always use `{repo}` ({base} branch) unless the user specifies otherwise.\n\n\
         **Core Workflow for ANY Task**:\n\
         1. **Prepare Workspace**: ALWAYS start by calling `prepare_repo_for_task`. It returns the workspace path \
            on a fresh `{new}` branch created from the latest `{base}`.\n\
         2. **Analyze Code**: Use the filesystem MCP tools to list and read files in the workspace. Identify \
            relevant files and existing resources before changing anything.\n\
         3. **Plan Changes**: Use the sequential-thinking MCP tool to reason through the modifications step by step.\n\
         4. **Modify Code**: Use the filesystem MCP tools to write or edit the Terraform files.\n\
         5. **Verify with Plan**: Run `terraform_plan` and summarize the plan for the user.\n\
         6. **Confirm & Apply**: NEVER call `terraform_apply` with `confirmed: true` unless the user has explicitly \
            approved the plan in this conversation. Ask and wait for the answer.\n\
         7. **Create Merge Request**: After a successful apply, call `create_merge_request` to finish the task.\n\n\
         **Error Handling**: If a tool reports an error (for example from `terraform_plan`), use `web_search` on \
         the official Terraform, HashiCorp or AWS documentation, fix the code and try again.\n\n{mcp_hint}",
        repo = defaults.repo_url,
        base = defaults.base_branch,
        new = defaults.new_branch,
    )
}

/// 装配 /terraform-agent 的运行时：工作区工具 + 检索 + MCP 工具
pub fn build_terraform_runtime(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    runner: Arc<dyn CommandRunner>,
    mcp_tools: Vec<Arc<dyn Tool>>,
    cancel_token: CancellationToken,
) -> ReactRuntime {
    let workspaces = Arc::new(WorkspaceManager::from_config(&cfg.workspace, runner));

    let mut registry = ToolRegistry::new();
    registry.register(PrepareWorkspaceTool::new(workspaces.clone()));
    registry.register(TerraformPlanTool::new(workspaces.clone()));
    registry.register(TerraformApplyTool::new(workspaces.clone()));
    registry.register(CreateMergeRequestTool::new(workspaces.clone(), &cfg.gitlab));
    registry.register(WebSearchTool::new(
        cfg.tools.search.allowed_domains.clone(),
        cfg.tools.search.timeout_secs,
        cfg.tools.search.max_result_chars,
    ));
    let mcp_names: Vec<String> = mcp_tools.iter().map(|t| t.name().to_string()).collect();
    for tool in mcp_tools {
        registry.register_arc(tool);
    }

    let instructions = terraform_instructions(workspaces.defaults(), &mcp_names);
    tracing::info!(tools = registry.len(), "terraform agent ready");
    ReactRuntime::new(
        llm,
        &instructions,
        registry,
        cfg.tools.tool_timeout_secs,
        cfg.agent.max_steps,
        cancel_token,
    )
}

/// 装配 /run-shell 的运行时：只有 shell 工具
pub fn build_shell_runtime(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    cancel_token: CancellationToken,
) -> ReactRuntime {
    let mut registry = ToolRegistry::new();
    registry.register(ShellTool::new(
        cfg.tools.shell.allowed_commands.clone(),
        cfg.tools.shell.timeout_secs,
    ));
    ReactRuntime::new(
        llm,
        SHELL_INSTRUCTIONS,
        registry,
        cfg.tools.tool_timeout_secs,
        cfg.agent.max_steps,
        cancel_token,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::RecordingRunner;

    #[test]
    fn terraform_runtime_registers_workflow_tools() {
        let cfg = AppConfig::default();
        let runtime = build_terraform_runtime(
            &cfg,
            Arc::new(MockLlmClient::new()),
            Arc::new(RecordingRunner::new()),
            vec![],
            CancellationToken::new(),
        );
        let names = runtime.tool_names();
        for expected in [
            "create_merge_request",
            "prepare_repo_for_task",
            "terraform_apply",
            "terraform_plan",
            "web_search",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert!(runtime.system_prompt().contains("NEVER call `terraform_apply`"));
        assert!(runtime.system_prompt().contains(&cfg.workspace.default_repo_url));
    }

    #[tokio::test]
    async fn shell_runtime_answers_through_llm() {
        let cfg = AppConfig::default();
        let llm = Arc::new(MockLlmClient::scripted(["Disk usage is fine."]));
        let runtime = build_shell_runtime(&cfg, llm, CancellationToken::new());
        assert_eq!(runtime.tool_names(), vec!["shell".to_string()]);

        let out = runtime.run("check disk", &[]).await.unwrap();
        assert_eq!(out.output, "Disk usage is fine.");
        assert!(out.tool_calls.is_empty());
    }
}
