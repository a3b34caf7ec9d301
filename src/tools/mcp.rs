//! MCP 工具服务（stdio 子进程）
//!
//! 每个 [[mcp.servers]] 启动一个子进程，由 rmcp 客户端完成握手与 tools/list；
//! 之后每次工具调用转为 tools/call。子进程的每个工具以 `<server>__<tool>` 名字注册进 ToolRegistry。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{Peer, RunningService};
use rmcp::transport::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::McpServerEntry;
use crate::core::AgentError;
use crate::tools::Tool;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// tools/list 中的单个工具描述
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<rmcp::model::Tool> for McpToolInfo {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.as_deref().unwrap_or_default().to_string(),
            input_schema: Value::Object(tool.input_schema.as_ref().clone()),
        }
    }
}

/// 一个已启动的 MCP 服务进程
pub struct McpServer {
    name: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

static ENV_VAR_RE: OnceLock<Regex> = OnceLock::new();

/// 将 `${VAR}` 替换为环境变量值，未设置的变量替换为空串
pub fn expand_env(raw: &str) -> String {
    let re = ENV_VAR_RE
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"));
    re.replace_all(raw, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

/// 将 tools/call 的结果（JSON 形式）拼接为文本；isError 为 true 时返回 Err
pub fn call_result_text(result: &Value) -> Result<String, String> {
    let text = result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_else(|| result.to_string());
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        Err(text)
    } else {
        Ok(text)
    }
}

impl McpServer {
    /// 启动进程并完成握手，返回服务与其工具列表
    pub async fn start(entry: &McpServerEntry) -> Result<(Arc<Self>, Vec<McpToolInfo>), AgentError> {
        let mcp_err = |what: &str, e: &dyn std::fmt::Display| {
            AgentError::McpError(format!("{}: {}: {}", entry.name, what, e))
        };

        let args: Vec<String> = entry.args.iter().map(|a| expand_env(a)).collect();
        let env: HashMap<String, String> = entry
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env(v)))
            .collect();
        let mut cmd = Command::new(&entry.command);
        cmd.args(&args).envs(&env);

        let transport =
            TokioChildProcess::new(cmd).map_err(|e| mcp_err(&format!("spawn {}", entry.command), &e))?;
        let service = tokio::time::timeout(REQUEST_TIMEOUT, ().serve(transport))
            .await
            .map_err(|e| mcp_err("initialize", &e))?
            .map_err(|e| mcp_err("initialize", &e))?;
        let peer = service.peer().clone();

        let tools = match tokio::time::timeout(REQUEST_TIMEOUT, peer.list_all_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                let _ = service.cancel().await;
                return Err(mcp_err("tools/list", &e));
            }
            Err(e) => {
                let _ = service.cancel().await;
                return Err(mcp_err("tools/list", &e));
            }
        };
        let tools: Vec<McpToolInfo> = tools.into_iter().map(McpToolInfo::from).collect();

        tracing::info!(server = %entry.name, tools = tools.len(), "MCP server started");
        let server = Arc::new(Self {
            name: entry.name.clone(),
            peer,
            service: Mutex::new(Some(service)),
        });
        Ok((server, tools))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String, String> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => return Err(format!("Arguments for {tool} must be an object, got {other}")),
        };
        let call = self.peer.call_tool(CallToolRequestParam {
            name: tool.to_string().into(),
            arguments,
        });
        let result = tokio::time::timeout(REQUEST_TIMEOUT, call)
            .await
            .map_err(|_| format!("{}: tools/call {} timed out", self.name, tool))?
            .map_err(|e| format!("{}: tools/call {} failed: {}", self.name, tool, e))?;
        let result = serde_json::to_value(&result).map_err(|e| e.to_string())?;
        call_result_text(&result)
    }

    /// 关闭连接并结束子进程；重复调用无副作用
    pub async fn shutdown(&self) {
        let Some(service) = self.service.lock().await.take() else {
            return;
        };
        match service.cancel().await {
            Ok(reason) => tracing::info!(server = %self.name, ?reason, "MCP server stopped"),
            Err(e) => tracing::warn!(server = %self.name, "MCP server shutdown failed: {}", e),
        }
    }
}

/// MCP 服务中单个工具在本地的代理
pub struct McpTool {
    server: Arc<McpServer>,
    remote_name: String,
    full_name: String,
    description: String,
    schema: Value,
}

impl McpTool {
    pub fn new(server: Arc<McpServer>, info: McpToolInfo) -> Self {
        let full_name = format!("{}__{}", server.name(), info.name);
        let schema = if info.input_schema.is_null() {
            serde_json::json!({ "type": "object", "properties": {} })
        } else {
            info.input_schema
        };
        Self {
            server,
            remote_name: info.name,
            full_name,
            description: info.description,
            schema,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.server.call_tool(&self.remote_name, args).await
    }
}

/// 启动配置中的全部 MCP 服务；任一失败即返回错误
pub async fn start_all(
    entries: &[McpServerEntry],
) -> Result<(Vec<Arc<McpServer>>, Vec<Arc<dyn Tool>>), AgentError> {
    let mut servers = Vec::new();
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for entry in entries {
        let (server, infos) = McpServer::start(entry).await?;
        for info in infos {
            tools.push(Arc::new(McpTool::new(server.clone(), info)));
        }
        servers.push(server);
    }
    Ok((servers, tools))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_braced_env_vars() {
        std::env::set_var("INFRA_AGENT_MCP_TEST_DIR", "/srv/tf");
        assert_eq!(expand_env("${INFRA_AGENT_MCP_TEST_DIR}/mods"), "/srv/tf/mods");
        assert_eq!(expand_env("${INFRA_AGENT_MCP_TEST_UNSET}"), "");
        assert_eq!(expand_env("$HOME plain"), "$HOME plain");
    }

    #[test]
    fn call_result_joins_text_content() {
        let ok = serde_json::json!({
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]
        });
        assert_eq!(call_result_text(&ok).unwrap(), "a\nb");

        let err = serde_json::json!({
            "isError": true,
            "content": [{"type": "text", "text": "not found"}]
        });
        assert_eq!(call_result_text(&err).unwrap_err(), "not found");
    }

    /// 用 sh 脚本模拟一个按行应答的 MCP 服务（响应 id 取自请求行）
    #[cfg(unix)]
    #[tokio::test]
    async fn talks_to_stdio_server() {
        let script = r#"
req_id() { printf '%s' "$1" | sed -n 's/.*"id":\([0-9]*\).*/\1/p'; }
read -r init
printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-fs","version":"0.0.1"}}}\n' "$(req_id "$init")"
read -r notified
read -r list
printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"read_file","description":"Read a file","inputSchema":{"type":"object"}}]}}\n' "$(req_id "$list")"
read -r call
printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"resource aws_s3_bucket logs {}"}],"isError":false}}\n' "$(req_id "$call")"
read -r rest
"#;
        let entry = McpServerEntry {
            name: "fs".into(),
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
        };
        let (servers, tools) = start_all(&[entry]).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "fs__read_file");

        let out = tools[0]
            .execute(serde_json::json!({"path": "main.tf"}))
            .await
            .unwrap();
        assert!(out.contains("aws_s3_bucket"));
        servers[0].shutdown().await;
    }

    #[tokio::test]
    async fn missing_binary_is_mcp_error() {
        let entry = McpServerEntry {
            name: "ghost".into(),
            command: "/definitely/not/a/binary".into(),
            args: vec![],
            env: HashMap::new(),
        };
        let err = McpServer::start(&entry).await.err().unwrap();
        assert!(matches!(err, AgentError::McpError(_)));
    }
}
