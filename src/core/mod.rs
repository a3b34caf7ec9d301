//! 核心编排层：错误与恢复、按键锁、任务会话编排、服务装配、优雅关闭

pub mod builder;
pub mod error;
pub mod keyed_lock;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;

pub use builder::{spawn_history_sweeper, AppBuilder};
pub use error::{AgentError, RecoveryAction};
pub use keyed_lock::{KeyGuard, KeyedLocks};
pub use orchestrator::Orchestrator;
pub use recovery::RecoveryEngine;
pub use shutdown::{
    McpServersCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
