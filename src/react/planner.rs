//! Planner：意图规划与 Tool Call 解析
//!
//! 调用 LLM 得到回复或 JSON Tool Call；parse_llm_output 从文本中提取 JSON 并解析为 ToolCall 或直接回复。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

/// LLM 返回的 Tool Call（{"tool": "terraform_plan", "args": {"repo_dir": "..."}}）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Planner 输出
#[derive(Debug, Clone)]
pub enum PlannerOutput {
    /// 直接回复用户
    Response(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 解析 LLM 输出：若含有效 JSON 且 tool 非空则为 ToolCall，否则为 Response
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();

    // ```json ... ``` 或裸 JSON
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            return Ok(PlannerOutput::Response(trimmed.to_string()));
        }
    } else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    // 回复中引用了 HCL 等花括号文本而不是工具调用时，按普通回复处理
    let value: serde_json::Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) if looks_like_tool_call(json_str) => {
            return Err(AgentError::JsonParseError(format!("{}: {}", e, json_str)));
        }
        Err(_) => return Ok(PlannerOutput::Response(trimmed.to_string())),
    };
    if value.get("tool").is_none() {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    }

    let parsed: ToolCall = serde_json::from_value(value)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    if parsed.tool.is_empty() {
        Ok(PlannerOutput::Response(trimmed.to_string()))
    } else {
        Ok(PlannerOutput::ToolCall(parsed))
    }
}

fn looks_like_tool_call(s: &str) -> bool {
    s.contains("\"tool\"")
}

/// Planner：持有 LLM 与 system prompt，拼 system + messages 后调用 LLM
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn plan(&self, messages: &[Message]) -> Result<String, AgentError> {
        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(Message::system(self.system_prompt.clone()));
        full_messages.extend_from_slice(messages);
        self.llm
            .complete(&full_messages)
            .await
            .map_err(AgentError::LlmError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_response() {
        match parse_llm_output("Plan looks good. Shall I apply?").unwrap() {
            PlannerOutput::Response(r) => assert_eq!(r, "Plan looks good. Shall I apply?"),
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn fenced_json_is_tool_call() {
        let out = "I'll plan first.\n```json\n{\"tool\": \"terraform_plan\", \"args\": {\"repo_dir\": \"/w/infra\"}}\n```";
        match parse_llm_output(out).unwrap() {
            PlannerOutput::ToolCall(tc) => {
                assert_eq!(tc.tool, "terraform_plan");
                assert_eq!(tc.args["repo_dir"], "/w/infra");
            }
            _ => panic!("expected tool call"),
        }
    }

    #[test]
    fn hcl_snippet_in_answer_is_not_a_tool_call() {
        let out = "Added:\nresource \"aws_s3_bucket\" \"logs\" { bucket = \"logs\" }";
        assert!(matches!(
            parse_llm_output(out).unwrap(),
            PlannerOutput::Response(_)
        ));
    }

    #[test]
    fn broken_tool_json_is_parse_error() {
        let err = parse_llm_output("{\"tool\": \"terraform_plan\", \"args\": {\"repo_dir\": }}")
            .unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }
}
