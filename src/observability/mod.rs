//! 可观测性：tracing 日志初始化
//!
//! 默认级别 info，可用 RUST_LOG 覆盖（如 `RUST_LOG=infra_agent=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
