//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `INFRA_AGENT__*` 覆盖（双下划线表示嵌套，如 `INFRA_AGENT__LLM__PROVIDER=openai`）。
//! 密钥（LLM API Key、GitLab Token、MCP Key）只从配置或环境变量读取，不写死在代码里。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 显式指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "INFRA_AGENT_CONFIG";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub history: HistorySection,
    pub classifier: ClassifierSection,
    pub workspace: WorkspaceSection,
    pub tools: ToolsSection,
    pub gitlab: GitlabSection,
    pub mcp: McpSection,
}

/// [server] 段：监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

/// [agent] 段：ReAct 循环参数
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

fn default_max_steps() -> usize {
    20
}

/// [history] 段：会话历史的空闲淘汰（0 表示不淘汰）
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default)]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 0,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

/// [classifier] 段：判定「新任务」的触发词
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSection {
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            triggers: default_triggers(),
        }
    }
}

/// 새로 / 추가 / 만들 / 생성 / 삭제 / 초기화
pub fn default_triggers() -> Vec<String> {
    ["새로", "추가", "만들", "생성", "삭제", "초기화"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// [workspace] 段：仓库检出根目录与默认仓库 / 分支
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceSection {
    /// 检出根目录，未设置时用 ~/terraform
    pub root: Option<PathBuf>,
    #[serde(default = "default_repo_url")]
    pub default_repo_url: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_new_branch")]
    pub default_new_branch: String,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: None,
            default_repo_url: default_repo_url(),
            default_branch: default_branch(),
            default_new_branch: default_new_branch(),
        }
    }
}

impl WorkspaceSection {
    pub fn resolved_root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("terraform")
        })
    }
}

fn default_repo_url() -> String {
    "https://gitlab.com/example/terraform.git".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_new_branch() -> String {
    "agent-task".to_string()
}

/// [tools] 段：工具超时、Shell 规则、Web 检索白名单
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），terraform apply 可能较慢
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            shell: ShellSection::default(),
            search: SearchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    900
}

/// [tools.shell] 段：允许执行的命令名（仅首词）；为空表示不限制命令名，只做危险模式过滤
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_shell_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            timeout_secs: default_shell_timeout_secs(),
        }
    }
}

fn default_shell_timeout_secs() -> u64 {
    60
}

/// [tools.search] 段：抓取 URL 的超时、最大字符数、允许的域名白名单
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_search_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            allowed_domains: default_allowed_domains(),
        }
    }
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    8000
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        "registry.terraform.io".into(),
        "developer.hashicorp.com".into(),
        "discuss.hashicorp.com".into(),
        "github.com".into(),
        "raw.githubusercontent.com".into(),
        "docs.aws.amazon.com".into(),
        "stackoverflow.com".into(),
        "docs.gitlab.com".into(),
    ]
}

/// [gitlab] 段：合并请求 API
#[derive(Debug, Clone, Deserialize)]
pub struct GitlabSection {
    #[serde(default = "default_gitlab_api_url")]
    pub api_url: String,
    /// 未设置时读取 GITLAB_TOKEN；工具调用参数中的 token 优先
    pub token: Option<String>,
}

impl Default for GitlabSection {
    fn default() -> Self {
        Self {
            api_url: default_gitlab_api_url(),
            token: None,
        }
    }
}

impl GitlabSection {
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("GITLAB_TOKEN").ok())
    }
}

fn default_gitlab_api_url() -> String {
    "https://gitlab.com/api/v4".to_string()
}

/// [mcp] 段：外部 MCP 工具服务进程
#[derive(Debug, Clone, Deserialize, Default)]
pub struct McpSection {
    #[serde(default)]
    pub servers: Vec<McpServerEntry>,
}

/// [[mcp.servers]]：name 用作工具前缀；args / env 中的 `${VAR}` 启动时从环境变量展开
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// 从 config 目录加载配置，环境变量 INFRA_AGENT__* 可覆盖
///
/// 1. 查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path（或设置了 INFRA_AGENT_CONFIG）且文件存在，则追加该文件
/// 3. 最后叠加环境变量 INFRA_AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    let explicit = config_path.or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));
    if let Some(path) = explicit {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("INFRA_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_original_workflow() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.workspace.default_branch, "main");
        assert_eq!(cfg.workspace.default_new_branch, "agent-task");
        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
        assert_eq!(cfg.history.idle_ttl_secs, 0);
        assert!(cfg.classifier.triggers.contains(&"삭제".to_string()));
        assert!(cfg.workspace.resolved_root().ends_with("terraform"));
    }

    #[test]
    fn loads_explicit_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "mock"

[workspace]
root = "/tmp/tf-work"
default_branch = "develop"

[[mcp.servers]]
name = "fs"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp/tf-work"]
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.workspace.default_branch, "develop");
        assert_eq!(cfg.workspace.resolved_root(), PathBuf::from("/tmp/tf-work"));
        assert_eq!(cfg.mcp.servers.len(), 1);
        assert_eq!(cfg.mcp.servers[0].args.len(), 3);
        assert_eq!(cfg.agent.max_steps, 20);
    }
}
