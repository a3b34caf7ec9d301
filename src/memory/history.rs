//! 会话历史存储
//!
//! user_id -> 有序 Turn 序列。仅在进程内存中，重启即丢失。
//! 存储本身只保证单次 get / replace 的原子性；同一用户「读-改-写」整轮的串行化由编排层的按用户锁负责。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::Message;

/// 会话历史存储接口（注入到 Orchestrator，便于替换实现与测试）
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 未知用户返回空序列
    async fn get(&self, user_id: &str) -> Vec<Message>;

    /// 整体替换该用户的历史
    async fn replace(&self, user_id: &str, turns: Vec<Message>);

    /// 清空（保留会话条目）
    async fn clear(&self, user_id: &str);

    /// 淘汰空闲超过 ttl 的会话，返回淘汰数量
    async fn evict_idle(&self, ttl: Duration) -> usize;

    /// 当前会话数
    async fn session_count(&self) -> usize;
}

struct UserSession {
    turns: Vec<Message>,
    last_active: Instant,
}

impl UserSession {
    fn new(turns: Vec<Message>) -> Self {
        Self {
            turns,
            last_active: Instant::now(),
        }
    }
}

/// 内存会话历史
#[derive(Default)]
pub struct InMemoryHistoryStore {
    sessions: RwLock<HashMap<String, UserSession>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn get(&self, user_id: &str) -> Vec<Message> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(|s| s.turns.clone())
            .unwrap_or_default()
    }

    async fn replace(&self, user_id: &str, turns: Vec<Message>) {
        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), UserSession::new(turns));
    }

    async fn clear(&self, user_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(user_id) {
            session.turns.clear();
            session.last_active = Instant::now();
        }
    }

    async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_active.elapsed() <= ttl);
        before - sessions.len()
    }

    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_user_has_empty_history() {
        let store = InMemoryHistoryStore::new();
        assert!(store.get("nobody").await.is_empty());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn replace_then_get_round_trips_in_order() {
        let store = InMemoryHistoryStore::new();
        let turns = vec![Message::user("a"), Message::agent("b"), Message::user("c")];
        store.replace("u1", turns.clone()).await;
        assert_eq!(store.get("u1").await, turns);
        assert!(store.get("u2").await.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_but_keeps_session() {
        let store = InMemoryHistoryStore::new();
        store.replace("u1", vec![Message::user("a")]).await;
        store.clear("u1").await;
        assert!(store.get("u1").await.is_empty());
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn evict_idle_drops_only_stale_sessions() {
        let store = InMemoryHistoryStore::new();
        store.replace("old", vec![Message::user("a")]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.replace("fresh", vec![Message::user("b")]).await;

        let evicted = store.evict_idle(Duration::from_millis(20)).await;
        assert_eq!(evicted, 1);
        assert!(store.get("old").await.is_empty());
        assert_eq!(store.get("fresh").await.len(), 1);
    }
}
