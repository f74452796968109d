//! 引擎构建器：统一 LLM、工具、检查点存储与提示词的装配
//!
//! CLI 与测试共用：测试直接注入 Mock LLM 与内存存储，CLI 通过 `from_app_config` 按配置装配。

use std::sync::Arc;

use crate::config::{AppConfig, ResearchConfig};
use crate::core::checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
use crate::core::error::ResearchError;
use crate::core::orchestrator::ResearchEngine;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::research::{BuiltinPrompts, EventSender, PromptSource, ResearchContext};
use crate::tools::{Tool, ToolRegistry, WebFetchTool};

/// ResearchEngine 构建器
pub struct ResearchEngineBuilder {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    config: ResearchConfig,
    store: Option<Arc<dyn CheckpointStore>>,
    prompts: Option<Arc<dyn PromptSource>>,
    events: Option<EventSender>,
}

impl ResearchEngineBuilder {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            tools: ToolRegistry::new(),
            config: ResearchConfig::default(),
            store: None,
            prompts: None,
            events: None,
        }
    }

    /// 按应用配置装配：LLM 后端、网页抓取工具、检查点存储（配置了 checkpoint_db 时用 SQLite）与提示词覆盖目录
    pub fn from_app_config(cfg: &AppConfig) -> Result<Self, ResearchError> {
        let llm = create_llm_from_config(cfg)?;
        let mut builder = Self::new(llm)
            .config(ResearchConfig::from_app_config(cfg))
            .tool(WebFetchTool::from_config(&cfg.tools.fetch));

        if let Some(path) = &cfg.app.checkpoint_db {
            tracing::info!(path = %path.display(), "Using SQLite checkpoint store");
            builder = builder.checkpoint_store(Arc::new(SqliteCheckpointStore::open(path)?));
        }
        if let Some(dir) = &cfg.research.prompts_dir {
            tracing::info!(dir = %dir.display(), "Loading prompt overrides");
            builder = builder.prompts(Arc::new(BuiltinPrompts::with_override_dir(dir)));
        }
        Ok(builder)
    }

    pub fn config(mut self, config: ResearchConfig) -> Self {
        self.config = config;
        self
    }

    /// 注册一个外部研究工具（搜索、抓取等）
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn prompts(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> ResearchEngine {
        tracing::debug!(
            tools = ?self.tools.tool_names(),
            max_concurrent = self.config.max_concurrent_researchers,
            "Building research engine"
        );
        let mut ctx = ResearchContext::new(self.llm, self.tools, self.config);
        if let Some(prompts) = self.prompts {
            ctx = ctx.with_prompts(prompts);
        }
        if let Some(events) = self.events {
            ctx = ctx.with_events(events);
        }
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>);
        ResearchEngine::new(ctx, store)
    }
}
