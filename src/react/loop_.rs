//! ReAct 主循环
//!
//! Plan -> Act (Tool) -> Observe -> 下一轮 Plan；支持 RetryWithPrompt、Cancel、最大步数限制。
//! 循环只在本次请求的草稿消息上工作，不写入会话历史；历史由编排层在成功后统一写回。

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::Message;
use crate::react::planner::PlannerOutput;
use crate::react::{parse_llm_output, Planner};
use crate::tools::ToolExecutor;

/// Observation 日志预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 单次工具调用记录（供调用方审计与测试断言）
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolCallRecord {
    pub tool: String,
    pub ok: bool,
}

/// ReAct 循环执行结果
#[derive(Debug)]
pub struct ReactResult {
    pub response: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// ReAct 会话配置
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub recovery: &'a RecoveryEngine,
    pub cancel_token: CancellationToken,
    pub max_steps: usize,
}

fn preview(s: &str) -> String {
    let mut p: String = s.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        p.push_str("...");
    }
    p
}

/// 执行 ReAct 循环
///
/// history 为本任务已有的对话轮次，user_input 为本轮输入。
/// 工具失败、超时、不存在的工具都作为 Observation 交还模型；LLM 不可用直接返回 Err。
pub async fn react_loop(
    session: &ReactSession<'_>,
    history: &[Message],
    user_input: &str,
) -> Result<ReactResult, AgentError> {
    let ReactSession {
        planner,
        executor,
        recovery,
        max_steps,
        ..
    } = *session;

    let mut scratch: Vec<Message> = history.to_vec();
    scratch.push(Message::user(user_input.to_string()));

    let mut tool_calls = Vec::new();
    let mut last_llm_output = String::new();
    let mut step = 0;

    loop {
        if session.cancel_token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        if step >= max_steps {
            tracing::warn!(max_steps, "react loop reached step limit");
            return Ok(ReactResult {
                response: format!(
                    "Reached the step limit ({}). Last output:\n{}",
                    max_steps, last_llm_output
                ),
                tool_calls,
            });
        }
        step += 1;

        let output = match planner.plan(&scratch).await {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(step, "planning failed: {}", e);
                return Err(e);
            }
        };
        last_llm_output = output.clone();

        let tc = match parse_llm_output(&output) {
            Ok(PlannerOutput::Response(resp)) => {
                let (prompt, completion, _) = planner.token_usage();
                tracing::debug!(step, prompt, completion, "react loop finished");
                return Ok(ReactResult {
                    response: resp,
                    tool_calls,
                });
            }
            Ok(PlannerOutput::ToolCall(tc)) => tc,
            Err(e) => match recovery.handle(&e, &executor.tool_names()) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    tracing::warn!(step, "malformed tool call, retrying: {}", e);
                    scratch.push(Message::agent(output));
                    scratch.push(Message::user(prompt));
                    continue;
                }
                RecoveryAction::Abort => return Err(e),
            },
        };

        if executor.get_tool(&tc.tool).is_none() {
            let err = AgentError::HallucinatedTool(tc.tool.clone());
            match recovery.handle(&err, &executor.tool_names()) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    tracing::warn!(step, tool = %tc.tool, "unknown tool requested");
                    tool_calls.push(ToolCallRecord {
                        tool: tc.tool.clone(),
                        ok: false,
                    });
                    scratch.push(Message::agent(output));
                    scratch.push(Message::user(prompt));
                    continue;
                }
                RecoveryAction::Abort => return Err(err),
            }
        }

        tracing::info!(step, tool = %tc.tool, "tool call");
        let (observation, ok) = match executor.execute(&tc.tool, tc.args).await {
            Ok(r) => (r, true),
            Err(e) => (format!("Error: {}", e), false),
        };
        tracing::debug!(tool = %tc.tool, ok, observation = %preview(&observation), "observation");
        tool_calls.push(ToolCallRecord {
            tool: tc.tool.clone(),
            ok,
        });

        // 将工具调用与结果写回草稿对话，供下一轮 Plan 使用
        scratch.push(Message::agent(output));
        scratch.push(Message::user(format!(
            "Observation from {}: {}",
            tc.tool, observation
        )));
    }
}
