//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RESEARCH__*` 覆盖（双下划线表示嵌套，如 `RESEARCH__LLM__PROVIDER=aliyun`）。
//! 运行期只读；研究相关参数经 ResearchConfig::from_app_config 钳制到合法范围。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub research: ResearchSection,
}

/// [app] 段：应用名、检查点数据库路径
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// SQLite 检查点文件；未设置时使用内存存储（进程退出即丢失）
    pub checkpoint_db: Option<PathBuf>,
}

/// [llm] 段：提供方、模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// deepseek / openai / aliyun / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 未设置时使用提供方默认模型
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            max_retries: default_max_retries(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [tools] 段：工具超时与网页抓取
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub fetch: FetchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            fetch: FetchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.fetch] 段：抓取 URL 的超时、最大字符数、允许的域名白名单（空表示不限制）
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            allowed_domains: Vec::new(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    8000
}

/// [research] 段：工作流参数（原始值，使用前经 ResearchConfig 钳制）
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchSection {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default = "default_max_review_iterations")]
    pub max_review_iterations: u32,
    #[serde(default = "default_max_concurrent_researchers")]
    pub max_concurrent_researchers: usize,
    #[serde(default = "default_max_discover_iterations")]
    pub max_discover_iterations: u32,
    /// 澄清前的搜索轮数，0 表示关闭
    #[serde(default)]
    pub clarify_search_iterations: u32,
    #[serde(default = "default_true")]
    pub allow_clarification: bool,
    #[serde(default)]
    pub verbose: bool,
    /// 提示词覆盖目录（<dir>/<name>.txt）
    pub prompts_dir: Option<PathBuf>,
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            max_review_iterations: default_max_review_iterations(),
            max_concurrent_researchers: default_max_concurrent_researchers(),
            max_discover_iterations: default_max_discover_iterations(),
            clarify_search_iterations: 0,
            allow_clarification: true,
            verbose: false,
            prompts_dir: None,
        }
    }
}

fn default_max_tool_calls() -> u32 {
    10
}

fn default_max_review_iterations() -> u32 {
    2
}

fn default_max_concurrent_researchers() -> usize {
    3
}

fn default_max_discover_iterations() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

/// 一次运行使用的研究参数（已钳制，运行期只读）
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub max_tool_calls: u32,
    pub max_review_iterations: u32,
    pub max_concurrent_researchers: usize,
    pub max_discover_iterations: u32,
    pub clarify_search_iterations: u32,
    pub allow_clarification: bool,
    pub verbose: bool,
    pub tool_timeout: Duration,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self::from_section(&ResearchSection::default(), default_tool_timeout_secs())
    }
}

impl ResearchConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self::from_section(&cfg.research, cfg.tools.tool_timeout_secs)
    }

    fn from_section(r: &ResearchSection, tool_timeout_secs: u64) -> Self {
        Self {
            max_tool_calls: r.max_tool_calls.clamp(1, 20),
            max_review_iterations: r.max_review_iterations.clamp(1, 10),
            max_concurrent_researchers: r.max_concurrent_researchers.clamp(1, 10),
            max_discover_iterations: r.max_discover_iterations.clamp(1, 10),
            clarify_search_iterations: r.clarify_search_iterations.min(2),
            allow_clarification: r.allow_clarification,
            verbose: r.verbose,
            tool_timeout: Duration::from_secs(tool_timeout_secs.max(1)),
        }
    }
}

/// 从 config 目录加载配置，环境变量 RESEARCH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RESEARCH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RESEARCH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = ResearchConfig::default();
        assert_eq!(cfg.max_tool_calls, 10);
        assert_eq!(cfg.max_review_iterations, 2);
        assert_eq!(cfg.max_concurrent_researchers, 3);
        assert_eq!(cfg.max_discover_iterations, 5);
        assert_eq!(cfg.clarify_search_iterations, 0);
        assert!(cfg.allow_clarification);
    }

    #[test]
    fn test_clamping() {
        let mut app = AppConfig::default();
        app.research.max_tool_calls = 0;
        app.research.max_review_iterations = 50;
        app.research.max_concurrent_researchers = 0;
        app.research.clarify_search_iterations = 9;
        let cfg = ResearchConfig::from_app_config(&app);
        assert_eq!(cfg.max_tool_calls, 1);
        assert_eq!(cfg.max_review_iterations, 10);
        assert_eq!(cfg.max_concurrent_researchers, 1);
        assert_eq!(cfg.clarify_search_iterations, 2);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[llm]\nprovider = \"aliyun\"\n\n[research]\nmax_tool_calls = 4\nallow_clarification = false\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "aliyun");
        assert_eq!(cfg.research.max_tool_calls, 4);
        assert!(!cfg.research.allow_clarification);
        assert_eq!(cfg.research.max_review_iterations, 2);
    }
}
