//! 任务会话编排器
//!
//! 每轮对话：取用户锁 → 读历史 → 任务边界判定（新任务则从空历史开始）→ 运行智能体 →
//! 成功后追加 user / agent 两条记录并整体写回。运行失败时不写历史，也不重试。
//! 用户锁覆盖整个读-改-写过程，同一用户的并发请求按到达顺序串行，不会丢失或交错。

use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentRuntime;
use crate::core::{AgentError, KeyedLocks};
use crate::gateway::{BoundaryClassifier, TaskBoundary};
use crate::memory::{HistoryStore, Message};

pub struct Orchestrator {
    history: Arc<dyn HistoryStore>,
    classifier: Arc<dyn BoundaryClassifier>,
    runtime: Arc<dyn AgentRuntime>,
    user_locks: KeyedLocks,
}

impl Orchestrator {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        classifier: Arc<dyn BoundaryClassifier>,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Self {
        Self {
            history,
            classifier,
            runtime,
            user_locks: KeyedLocks::new(),
        }
    }

    /// 处理一轮用户输入，返回智能体最终文本
    pub async fn handle(&self, user_id: &str, utterance: &str) -> Result<String, AgentError> {
        let _guard = self.user_locks.lock(user_id).await;

        let boundary = self.classifier.classify(utterance);
        let mut turns = match boundary {
            TaskBoundary::NewTask => Vec::new(),
            TaskBoundary::Continuation => self.history.get(user_id).await,
        };
        tracing::info!(?boundary, prior_turns = turns.len(), "turn started");

        let outcome = match self.runtime.run(utterance, &turns).await {
            Ok(o) => o,
            Err(e) => {
                tracing::error!("agent run failed, history left unchanged: {}", e);
                return Err(e);
            }
        };

        turns.push(Message::user(utterance));
        turns.push(Message::agent(outcome.output.clone()));
        self.history.replace(user_id, turns).await;

        tracing::info!(tool_calls = outcome.tool_calls.len(), "turn finished");
        Ok(outcome.output)
    }

    /// 当前保存的历史（不取用户锁，读取的是最近一次写回的快照）
    pub async fn history(&self, user_id: &str) -> Vec<Message> {
        self.history.get(user_id).await
    }

    /// 清空该用户历史；与进行中的轮次互斥
    pub async fn reset(&self, user_id: &str) {
        let _guard = self.user_locks.lock(user_id).await;
        self.history.clear(user_id).await;
        tracing::info!(user_id, "history cleared");
    }

    /// 清除超过 ttl 未活动的会话，并回收空闲的用户锁
    pub async fn sweep(&self, ttl: Duration) -> usize {
        let evicted = self.history.evict_idle(ttl).await;
        self.user_locks.prune();
        if evicted > 0 {
            tracing::info!(evicted, "idle sessions evicted");
        }
        evicted
    }

    pub async fn session_count(&self) -> usize {
        self.history.session_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RunOutcome;
    use crate::gateway::KeywordClassifier;
    use crate::memory::InMemoryHistoryStore;
    use async_trait::async_trait;

    /// 回显输入，并记录收到的历史长度
    struct EchoRuntime;

    #[async_trait]
    impl AgentRuntime for EchoRuntime {
        async fn run(&self, utterance: &str, history: &[Message]) -> Result<RunOutcome, AgentError> {
            Ok(RunOutcome {
                output: format!("{}|{}", history.len(), utterance),
                tool_calls: vec![],
            })
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(InMemoryHistoryStore::new()),
            Arc::new(KeywordClassifier::default()),
            Arc::new(EchoRuntime),
        )
    }

    #[tokio::test]
    async fn new_task_starts_from_empty_history() {
        let orch = orchestrator();
        assert_eq!(orch.handle("u1", "S3 버킷 생성해줘").await.unwrap(), "0|S3 버킷 생성해줘");
        assert_eq!(orch.handle("u1", "응 진행해").await.unwrap(), "2|응 진행해");
        assert_eq!(orch.history("u1").await.len(), 4);

        assert_eq!(orch.handle("u1", "새로 VPC 만들어줘").await.unwrap(), "0|새로 VPC 만들어줘");
        assert_eq!(orch.history("u1").await.len(), 2);
    }

    #[tokio::test]
    async fn reset_clears_history() {
        let orch = orchestrator();
        orch.handle("u1", "plan 보여줘").await.unwrap();
        orch.reset("u1").await;
        assert!(orch.history("u1").await.is_empty());
    }

    #[tokio::test]
    async fn one_shot_users_leave_no_lock_slots() {
        let orch = orchestrator();
        for i in 0..1000 {
            let user = format!("user-{i}");
            orch.handle(&user, "plan 보여줘").await.unwrap();
            orch.reset(&user).await;
        }
        assert!(orch.user_locks.is_empty());
        assert_eq!(orch.session_count().await, 0);
    }
}
