//! 按键互斥锁
//!
//! 同一个 key（user_id、工作区目录）上的临界区串行执行，不同 key 互不阻塞。
//! 外层 map 锁只在查找、插入、回收锁对象时短暂持有，从不跨 await。
//! 守卫释放时若已无人持有或等待该 key，对应锁对象随即从 map 中移除。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot = Arc<Mutex<()>>;

#[derive(Default)]
pub struct KeyedLocks {
    locks: StdMutex<HashMap<String, Slot>>,
}

/// 持有期间独占对应 key
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.owner.map();
        // map 与本守卫各持一份引用时，没有其他任务在等待
        let idle = locks
            .get(&self.key)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2);
        if idle {
            locks.remove(&self.key);
        }
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> StdMutexGuard<'_, HashMap<String, Slot>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 获取 key 对应的锁；不存在则创建
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let slot = self
            .map()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = slot.clone().lock_owned().await;
        KeyGuard {
            owner: self,
            key: key.to_string(),
            slot,
            guard: Some(guard),
        }
    }

    /// 移除当前无人持有、也无人等待的锁对象，返回移除数量
    pub fn prune(&self) -> usize {
        let mut locks = self.map();
        let before = locks.len();
        locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - locks.len()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _g = locks.lock("repo").await;
                counter.lock().await.push(format!("start-{i}"));
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.lock().await.push(format!("end-{i}"));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let events = counter.lock().await.clone();
        for pair in events.chunks(2) {
            let start = pair[0].trim_start_matches("start-");
            let end = pair[1].trim_start_matches("end-");
            assert_eq!(start, end, "critical sections interleaved: {events:?}");
        }
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_keys_are_removed() {
        let locks = KeyedLocks::new();
        for i in 0..100 {
            drop(locks.lock(&format!("user-{i}")).await);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn slot_survives_while_someone_waits() {
        let locks = Arc::new(KeyedLocks::new());
        let first = locks.lock("repo").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("repo").await;
                locks.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(locks.len(), 1);

        assert_eq!(waiter.await.unwrap(), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = KeyedLocks::new();
        let _held = locks.lock("held").await;
        assert_eq!(locks.len(), 1);
        assert_eq!(locks.prune(), 0);
        assert_eq!(locks.len(), 1);
    }
}
