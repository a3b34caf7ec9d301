//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / Abort。
//! 工具层失败在 ReAct 循环内转为文本 Observation，只有运行时层错误会冒泡到 HTTP 层。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    /// LLM 后端不可用（网络、鉴权、限流等），对本次请求是致命错误
    #[error("LLM error: {0}")]
    LlmError(String),

    /// MCP 工具服务进程启动或通信失败
    #[error("MCP server error: {0}")]
    McpError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 服务正在关闭导致的中断（对外映射为 503，其余运行时失败为 502）
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误、调用了不存在的工具）
    RetryWithPrompt(String),
    /// 终止当前请求
    Abort,
}
