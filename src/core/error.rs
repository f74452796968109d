//! 研究工作流错误类型
//!
//! 阶段内部的可恢复错误（结构化解码、工具失败、超长上下文）由各阶段映射为降级决策，
//! 只有启动前的配置错误是致命的。

use thiserror::Error;

use crate::llm::LlmError;

/// 工作流运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum ResearchError {
    /// 结构化输出无法解析（各调用点自行给出默认值，不向上传播）
    #[error("Structured output decode failed: {0}")]
    StructuredDecode(String),

    /// 单次工具调用失败（作为工具结果回给模型）
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 生成超出上下文窗口
    #[error("Context size limit exceeded: {0}")]
    SizeLimit(String),

    /// 缺少必需的凭据或配置（启动前致命）
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Thread {0} is not awaiting input")]
    InvalidResume(String),
}

impl ResearchError {
    pub fn is_size_limit(&self) -> bool {
        matches!(self, ResearchError::SizeLimit(_))
    }
}

impl From<LlmError> for ResearchError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::ContextLengthExceeded(msg) => ResearchError::SizeLimit(msg),
            other => ResearchError::Llm(other.to_string()),
        }
    }
}
