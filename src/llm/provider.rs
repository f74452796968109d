//! 提供方选择与客户端工厂
//!
//! 所有提供方都走 OpenAI 兼容端点：
//! - deepseek: https://api.deepseek.com（deepseek-chat / deepseek-reasoner）
//! - aliyun: DashScope 兼容模式（qwen-max 等）
//! - openai: 官方或自建代理（base_url 可配置）
//! - mock: 本地脚本化客户端，无需 API Key
//!
//! 真实提供方缺少 API Key 时返回 ResearchError::Configuration，在任何阶段运行前失败。

use std::str::FromStr;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::ResearchError;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryConfig, RetryingLlmClient};

/// llm.max_retries 的上限
const MAX_RETRIES: u32 = 10;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

pub const ALIYUN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const ALIYUN_DEFAULT_MODEL: &str = "qwen-max";

pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";

/// 模型提供方
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    DeepSeek,
    OpenAi,
    Aliyun,
    Mock,
}

impl FromStr for Provider {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deepseek" => Ok(Provider::DeepSeek),
            "openai" => Ok(Provider::OpenAi),
            "aliyun" | "dashscope" | "qwen" => Ok(Provider::Aliyun),
            "mock" => Ok(Provider::Mock),
            other => Err(ResearchError::Configuration(format!("unknown LLM provider: {other}"))),
        }
    }
}

impl Provider {
    /// 按顺序查找的 API Key 环境变量
    pub fn api_key_vars(self) -> &'static [&'static str] {
        match self {
            Provider::DeepSeek => &["DEEPSEEK_API_KEY"],
            Provider::OpenAi => &["OPENAI_API_KEY"],
            Provider::Aliyun => &["ALIYUN_API_KEY", "DASHSCOPE_API_KEY"],
            Provider::Mock => &[],
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::DeepSeek => DEEPSEEK_CHAT,
            Provider::OpenAi => OPENAI_DEFAULT_MODEL,
            Provider::Aliyun => ALIYUN_DEFAULT_MODEL,
            Provider::Mock => "mock",
        }
    }

    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Provider::DeepSeek => Some(DEEPSEEK_BASE_URL),
            Provider::Aliyun => Some(ALIYUN_BASE_URL),
            Provider::OpenAi | Provider::Mock => None,
        }
    }
}

/// 解析 API Key；lookup 通常为环境变量读取
pub fn resolve_api_key(
    provider: Provider,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ResearchError> {
    let vars = provider.api_key_vars();
    vars.iter()
        .filter_map(|var| lookup(var))
        .find(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            ResearchError::Configuration(format!(
                "missing API key for provider {:?}: set {}",
                provider,
                vars.join(" or ")
            ))
        })
}

/// 根据配置创建 LLM 客户端（真实提供方外包一层重试）
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, ResearchError> {
    let provider: Provider = cfg.llm.provider.parse()?;
    if provider == Provider::Mock {
        tracing::warn!("Using Mock LLM, responses are scripted placeholders");
        return Ok(Arc::new(MockLlmClient::new()));
    }

    let api_key = resolve_api_key(provider, |var| std::env::var(var).ok())?;
    let model = cfg
        .llm
        .model
        .clone()
        .unwrap_or_else(|| provider.default_model().to_string());
    let base_url = cfg.llm.base_url.as_deref().or(provider.default_base_url());

    tracing::info!(provider = ?provider, model = %model, "Using LLM provider");
    let client = OpenAiClient::new(base_url, &model, &api_key).with_timeout(cfg.llm.timeouts.request);
    let retry = RetryConfig {
        max_retries: cfg.llm.max_retries.min(MAX_RETRIES),
        ..RetryConfig::default()
    };
    Ok(Arc::new(RetryingLlmClient::new(Arc::new(client), retry)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!("DeepSeek".parse::<Provider>().unwrap(), Provider::DeepSeek);
        assert_eq!("dashscope".parse::<Provider>().unwrap(), Provider::Aliyun);
        assert!("claude-local".parse::<Provider>().is_err());
    }

    #[test]
    fn test_aliyun_key_falls_back_to_dashscope_var() {
        let key = resolve_api_key(Provider::Aliyun, |var| {
            (var == "DASHSCOPE_API_KEY").then(|| "sk-dash".to_string())
        })
        .unwrap();
        assert_eq!(key, "sk-dash");
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = resolve_api_key(Provider::OpenAi, |_| None).unwrap_err();
        assert!(matches!(err, ResearchError::Configuration(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_mock_provider_needs_no_key() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        let llm = create_llm_from_config(&cfg).unwrap();
        assert_eq!(llm.model_name(), "mock");
    }
}
