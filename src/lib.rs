//! infra-agent - Terraform / Shell 智能体 HTTP 服务
//!
//! 模块划分：
//! - **agent**: AgentRuntime 接口与 ReAct 运行时装配（terraform 智能体 / shell 智能体）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、按键锁、任务会话编排器、服务装配、优雅关闭
//! - **gateway**: 任务边界判定与 axum HTTP 路由
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息与按用户的会话历史
//! - **react**: Planner 与 ReAct 主循环
//! - **tools**: 工作区、terraform、merge request、检索、shell、MCP 工具与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
