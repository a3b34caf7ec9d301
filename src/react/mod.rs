//! 认知层：Planner 与 ReAct 主循环

pub mod loop_;
pub mod planner;

pub use loop_::{react_loop, ReactResult, ReactSession, ToolCallRecord};
pub use planner::{parse_llm_output, Planner, PlannerOutput, ToolCall};
