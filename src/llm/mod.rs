//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;

use crate::config::LlmSection;
use crate::core::AgentError;

/// 按配置创建 LLM 客户端；真实后端缺少 API Key 时报错，不静默退回 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.provider.to_lowercase().as_str() {
        "mock" => {
            tracing::warn!("Using Mock LLM");
            Ok(Arc::new(MockLlmClient::new()))
        }
        "openai" => {
            let api_key = cfg
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or_else(|| {
                    AgentError::ConfigError(
                        "llm.api_key or OPENAI_API_KEY must be set".to_string(),
                    )
                })?;
            tracing::info!(model = %cfg.model, "Using OpenAI-compatible LLM");
            Ok(Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                &api_key,
                cfg.request_timeout_secs,
            )))
        }
        other => Err(AgentError::ConfigError(format!(
            "unknown llm provider: {other}"
        ))),
    }
}
