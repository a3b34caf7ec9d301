pub mod executor;
pub mod mcp;
pub mod merge_request;
pub mod process;
pub mod registry;
pub mod schema;
pub mod search;
pub mod shell;
pub mod terraform;
pub mod workspace;

pub use executor::ToolExecutor;
pub use mcp::{McpServer, McpTool};
pub use merge_request::CreateMergeRequestTool;
pub use process::{CommandOutput, CommandRunner, ProcessRunner, RecordedCommand, RecordingRunner};
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use search::WebSearchTool;
pub use shell::ShellTool;
pub use terraform::{TerraformApplyTool, TerraformPlanTool, APPLY_NOT_CONFIRMED};
pub use workspace::{PrepareWorkspaceTool, WorkspaceDefaults, WorkspaceManager};
