//! LLM 层：客户端抽象、结构化输出与实现（OpenAI 兼容 / DeepSeek / 阿里云 / Mock）

pub mod mock;
pub mod openai;
pub mod provider;
pub mod structured;
pub mod traits;

pub use mock::{MockLlmClient, MockReply};
pub use openai::{OpenAiClient, TokenUsage};
pub use provider::{create_llm_from_config, Provider};
pub use structured::{extract_json_block, invoke_structured, invoke_structured_prompt};
pub use traits::{LlmClient, LlmError, LlmResponse, RetryConfig, RetryingLlmClient, ToolSpec};
