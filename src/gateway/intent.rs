//! 任务边界识别
//!
//! 判断一句用户输入是开启新任务（丢弃历史）还是延续当前任务（追加历史）。
//! 默认策略是触发词子串匹配，属于启发式规则；任何策略在无法判断时都必须回落到 Continuation。

use serde::{Deserialize, Serialize};

/// 识别结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskBoundary {
    NewTask,
    Continuation,
}

/// 任务边界识别策略
pub trait BoundaryClassifier: Send + Sync {
    fn classify(&self, utterance: &str) -> TaskBoundary;
}

/// 触发词规则：输入中包含任一触发词即为新任务
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    triggers: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(triggers: Vec<String>) -> Self {
        let triggers = triggers
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { triggers }
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(crate::config::default_triggers())
    }
}

impl BoundaryClassifier for KeywordClassifier {
    fn classify(&self, utterance: &str) -> TaskBoundary {
        let input = utterance.trim().to_lowercase();
        if input.is_empty() {
            return TaskBoundary::Continuation;
        }
        if self.triggers.iter().any(|t| input.contains(t.as_str())) {
            TaskBoundary::NewTask
        } else {
            TaskBoundary::Continuation
        }
    }
}
