//! 工具调用 JSON Schema 生成
//!
//! 用 schemars 从 ToolCallFormat 生成 schema，拼入 system prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 与 ReAct 解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 prepare_repo_for_task、terraform_plan、terraform_apply
    pub tool: String,
    /// 工具参数，依工具不同而不同（repo_dir、confirmed、project_id 等）
    pub args: HashMap<String, serde_json::Value>,
}

/// 返回工具调用的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_tool_and_args() {
        let schema = tool_call_schema_json();
        assert!(schema.contains("\"tool\""));
        assert!(schema.contains("\"args\""));
    }
}
