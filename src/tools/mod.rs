//! 研究工具：注册表、带超时的执行器、参数 schema、控制工具与网页抓取

pub mod control;
pub mod executor;
pub mod fetch;
pub mod registry;
pub mod schema;

pub use control::{ResearchCompleteTool, ThinkTool};
pub use executor::ToolExecutor;
pub use fetch::WebFetchTool;
pub use registry::{Tool, ToolRegistry};
