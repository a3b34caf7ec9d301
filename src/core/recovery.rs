//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 ReAct 循环决定是重试还是终止。
//! 编排层自身不重试；这里只处理「模型输出不合规」一类可由模型自行修正的错误。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// available_tools 用于在模型幻觉出不存在的工具时提示可用列表
    pub fn handle(&self, err: &AgentError, available_tools: &[String]) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous tool call was not valid JSON: {raw}. \
                 When calling a tool, output exactly one JSON object and nothing else, \
                 in the form {{\"tool\": \"<name>\", \"args\": {{...}}}}."
            )),
            AgentError::HallucinatedTool(name) => {
                let mut names = available_tools.to_vec();
                names.sort();
                RecoveryAction::RetryWithPrompt(format!(
                    "Tool '{name}' does not exist. Available tools: {}.",
                    names.join(", ")
                ))
            }
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_json_parse_error() {
        let engine = RecoveryEngine::new();
        let err = AgentError::JsonParseError("invalid json".to_string());
        match engine.handle(&err, &[]) {
            RecoveryAction::RetryWithPrompt(msg) => assert!(msg.contains("JSON")),
            _ => panic!("Expected RetryWithPrompt"),
        }
    }

    #[test]
    fn test_recovery_hallucinated_tool_lists_valid_names() {
        let engine = RecoveryEngine::new();
        let err = AgentError::HallucinatedTool("terraform_destroy".to_string());
        let tools = vec!["terraform_plan".to_string(), "terraform_apply".to_string()];
        match engine.handle(&err, &tools) {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains("terraform_destroy"));
                assert!(msg.contains("terraform_apply, terraform_plan"));
            }
            _ => panic!("Expected RetryWithPrompt"),
        }
    }

    #[test]
    fn test_recovery_llm_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::LlmError("connection refused".to_string());
        assert!(matches!(engine.handle(&err, &[]), RecoveryAction::Abort));
    }

    #[test]
    fn test_recovery_cancelled() {
        let engine = RecoveryEngine::new();
        assert!(matches!(
            engine.handle(&AgentError::Cancelled, &[]),
            RecoveryAction::Abort
        ));
    }
}
