//! 核心编排层：错误、状态与合并、检查点、有界调度、主控循环与关闭信号

pub mod builder;
pub mod checkpoint;
pub mod error;
pub mod orchestrator;
pub mod reducer;
pub mod shutdown;
pub mod state;
pub mod task_scheduler;

pub use builder::ResearchEngineBuilder;
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
pub use error::ResearchError;
pub use orchestrator::{ResearchEngine, RunOutcome};
pub use reducer::{merge_sections, upsert_by_key};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{
    DiscoveredItem, OutputFormat, Priority, QueryType, ResearchState, RunStatus, Section, SectionStatus,
    StateUpdate,
};
pub use task_scheduler::{BatchStats, TaskId, TaskScheduler};
