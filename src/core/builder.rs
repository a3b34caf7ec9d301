//! 服务装配：由配置构建两个智能体、编排器与 HTTP 共享状态
//!
//! 二进制入口与集成测试共用同一条装配路径；测试通过 with_llm / with_runner 注入假实现。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent::{build_shell_runtime, build_terraform_runtime, AgentRuntime};
use crate::config::AppConfig;
use crate::core::{AgentError, Orchestrator};
use crate::gateway::{AppState, KeywordClassifier};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{HistoryStore, InMemoryHistoryStore};
use crate::tools::{CommandRunner, ProcessRunner, Tool};

pub struct AppBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    runner: Option<Arc<dyn CommandRunner>>,
    history: Option<Arc<dyn HistoryStore>>,
    mcp_tools: Vec<Arc<dyn Tool>>,
    cancel_token: CancellationToken,
}

impl AppBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            runner: None,
            history: None,
            mcp_tools: Vec::new(),
            cancel_token: CancellationToken::new(),
        }
    }

    /// 覆盖按 [llm] 配置创建的客户端
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 覆盖 git / terraform 的进程执行器
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_mcp_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.mcp_tools = tools;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn build(self) -> Result<Arc<AppState>, AgentError> {
        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&self.config.llm)?,
        };
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(ProcessRunner) as Arc<dyn CommandRunner>);
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(InMemoryHistoryStore::new()) as Arc<dyn HistoryStore>);

        let terraform = build_terraform_runtime(
            &self.config,
            llm.clone(),
            runner,
            self.mcp_tools,
            self.cancel_token.clone(),
        );
        let shell: Arc<dyn AgentRuntime> = Arc::new(build_shell_runtime(
            &self.config,
            llm,
            self.cancel_token,
        ));

        let classifier = KeywordClassifier::new(self.config.classifier.triggers.clone());
        let orchestrator = Orchestrator::new(history, Arc::new(classifier), Arc::new(terraform));

        Ok(Arc::new(AppState {
            shell,
            terraform: Arc::new(orchestrator),
        }))
    }
}

/// 后台定期淘汰空闲会话；ttl 为 0 时不启动
pub fn spawn_history_sweeper(
    orchestrator: Arc<Orchestrator>,
    idle_ttl_secs: u64,
    sweep_interval_secs: u64,
    cancel_token: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if idle_ttl_secs == 0 {
        return None;
    }
    let ttl = Duration::from_secs(idle_ttl_secs);
    let period = Duration::from_secs(sweep_interval_secs.max(1));
    tracing::info!(idle_ttl_secs, "history idle eviction enabled");

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    orchestrator.sweep(ttl).await;
                }
            }
        }
    }))
}
