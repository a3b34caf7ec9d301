//! 接入层：任务边界判定与 HTTP 路由

pub mod http;
pub mod intent;

pub use http::{create_router, AppState, HistoryResponse, RunResponse};
pub use intent::{BoundaryClassifier, KeywordClassifier, TaskBoundary};
