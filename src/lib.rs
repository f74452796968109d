//! Bee Research - Rust 深度研究工作流引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与研究参数钳制
//! - **core**: 状态与合并、检查点、有界调度、编排主循环、关闭信号
//! - **llm**: LLM 客户端抽象、结构化输出与实现（OpenAI 兼容 / DeepSeek / 阿里云 / Mock）
//! - **memory**: 对话消息与工具调用
//! - **research**: 工作流各阶段、工具调用循环、提示词与进度事件
//! - **tools**: 工具注册表、执行器、控制工具与网页抓取

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod research;
pub mod tools;

pub use crate::core::{ResearchEngine, ResearchEngineBuilder, ResearchError, RunOutcome};
